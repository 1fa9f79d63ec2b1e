//! Apply-patch dispatch for builtin tool calls.
//!
//! No teacher file touches the filesystem; grounded on `tools.rs`'s
//! `ToolHandler` (`Arc<dyn Fn(...) -> Pin<Box<dyn Future<...>>> + Send +
//! Sync>`) boxed-closure convention, generalized from arbitrary JSON
//! tools to the fixed `create_file`/`update_file`/`delete_file` builtin
//! operations. The unified-diff mechanics live in [`crate::diff`].

use crate::diff::apply_diff;
use crate::types::{ApplyPatchOperation, BuiltinToolStatus};
use crate::Result;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Host-supplied filesystem access for the apply-patch builtin tool.
/// `mkdir` defaults to a no-op since flat-file harnesses (an in-memory
/// map, a single directory) have no subdirectories to create.
#[async_trait]
pub trait FileSystemHarness: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String>;
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;
    async fn delete_file(&self, path: &str) -> Result<()>;
    async fn file_exists(&self, path: &str) -> Result<bool>;
    async fn mkdir(&self, _path: &str) -> Result<()> {
        Ok(())
    }
}

/// A registered builtin-tool callback, keyed by call-type keyword
/// (`"apply_patch"`) in an `Agent`'s `HashMap<String, BuiltinToolHandler>`.
/// Takes the call's operation and returns the status/output pair that
/// becomes the matching [`crate::types::BuiltinToolResult`].
pub type BuiltinToolHandler = Arc<
    dyn Fn(ApplyPatchOperation) -> Pin<Box<dyn Future<Output = (BuiltinToolStatus, String)> + Send>>
        + Send
        + Sync,
>;

/// Call-type keyword under which [`apply_patch_handler`] should be
/// registered in an agent's builtin-tool handler map.
pub const APPLY_PATCH: &str = "apply_patch";

/// Build a [`BuiltinToolHandler`] that dispatches apply-patch operations
/// against `harness`. When `dry_run` is set, no mutation reaches the
/// harness and successful output is prefixed `"[DRY RUN] "`. When
/// `create_backups` is set, `update_file`/`delete_file` write the
/// pre-change content to `path + ".bak"` before mutating.
pub fn apply_patch_handler(
    harness: Arc<dyn FileSystemHarness>,
    dry_run: bool,
    create_backups: bool,
) -> BuiltinToolHandler {
    Arc::new(move |operation| {
        let harness = Arc::clone(&harness);
        Box::pin(async move {
            match dispatch(&*harness, &operation, dry_run, create_backups).await {
                Ok(output) => (BuiltinToolStatus::Completed, output),
                Err(err) => {
                    tracing::warn!(error = %err, path = operation.path(), "apply-patch failed");
                    (BuiltinToolStatus::Failed, err.to_string())
                }
            }
        })
    })
}

async fn dispatch(
    harness: &dyn FileSystemHarness,
    operation: &ApplyPatchOperation,
    dry_run: bool,
    create_backups: bool,
) -> Result<String> {
    let output = match operation {
        ApplyPatchOperation::CreateFile { path, diff } => {
            if harness.file_exists(path).await? {
                return Err(crate::Error::apply_patch_error(format!(
                    "create_file: '{}' already exists",
                    path
                )));
            }
            let content = apply_diff("", diff);
            if !dry_run {
                harness.write_file(path, &content).await?;
            }
            format!("created '{}'", path)
        }
        ApplyPatchOperation::UpdateFile { path, diff } => {
            if !harness.file_exists(path).await? {
                return Err(crate::Error::apply_patch_error(format!(
                    "update_file: '{}' does not exist",
                    path
                )));
            }
            let current = harness.read_file(path).await?;
            if !dry_run {
                if create_backups {
                    harness.write_file(&format!("{}.bak", path), &current).await?;
                }
                let updated = apply_diff(&current, diff);
                harness.write_file(path, &updated).await?;
            }
            format!("updated '{}'", path)
        }
        ApplyPatchOperation::DeleteFile { path } => {
            if !harness.file_exists(path).await? {
                return Err(crate::Error::apply_patch_error(format!(
                    "delete_file: '{}' does not exist",
                    path
                )));
            }
            if !dry_run {
                if create_backups {
                    let current = harness.read_file(path).await?;
                    harness.write_file(&format!("{}.bak", path), &current).await?;
                }
                harness.delete_file(path).await?;
            }
            format!("deleted '{}'", path)
        }
    };

    Ok(if dry_run {
        format!("[DRY RUN] {}", output)
    } else {
        output
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;
    use std::collections::HashMap;

    struct MemoryHarness {
        files: Mutex<HashMap<String, String>>,
    }

    impl MemoryHarness {
        fn new(initial: &[(&str, &str)]) -> Self {
            let files = initial
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            Self {
                files: Mutex::new(files),
            }
        }
    }

    #[async_trait]
    impl FileSystemHarness for MemoryHarness {
        async fn read_file(&self, path: &str) -> Result<String> {
            self.files
                .lock()
                .await
                .get(path)
                .cloned()
                .ok_or_else(|| crate::Error::apply_patch_error(format!("no such file: {}", path)))
        }

        async fn write_file(&self, path: &str, content: &str) -> Result<()> {
            self.files
                .lock()
                .await
                .insert(path.to_string(), content.to_string());
            Ok(())
        }

        async fn delete_file(&self, path: &str) -> Result<()> {
            self.files.lock().await.remove(path);
            Ok(())
        }

        async fn file_exists(&self, path: &str) -> Result<bool> {
            Ok(self.files.lock().await.contains_key(path))
        }
    }

    #[tokio::test]
    async fn test_create_file_succeeds_when_absent() {
        let harness = Arc::new(MemoryHarness::new(&[]));
        let output = dispatch(
            &*harness,
            &ApplyPatchOperation::CreateFile {
                path: "new.txt".to_string(),
                diff: "+hello".to_string(),
            },
            false,
            false,
        )
        .await
        .unwrap();
        assert!(output.contains("created"));
        assert_eq!(harness.read_file("new.txt").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_create_file_fails_when_present() {
        let harness = Arc::new(MemoryHarness::new(&[("a.txt", "x")]));
        let result = dispatch(
            &*harness,
            &ApplyPatchOperation::CreateFile {
                path: "a.txt".to_string(),
                diff: "+y".to_string(),
            },
            false,
            false,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_update_file_fails_when_absent() {
        let harness = Arc::new(MemoryHarness::new(&[]));
        let result = dispatch(
            &*harness,
            &ApplyPatchOperation::UpdateFile {
                path: "missing.txt".to_string(),
                diff: "@@ -1,1 +1,1 @@\n-x\n+y".to_string(),
            },
            false,
            false,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_update_file_applies_diff_and_writes_backup() {
        let harness = Arc::new(MemoryHarness::new(&[("a.txt", "one\ntwo")]));
        dispatch(
            &*harness,
            &ApplyPatchOperation::UpdateFile {
                path: "a.txt".to_string(),
                diff: "@@ -1,2 +1,2 @@\n one\n-two\n+TWO".to_string(),
            },
            false,
            true,
        )
        .await
        .unwrap();
        assert_eq!(harness.read_file("a.txt").await.unwrap(), "one\nTWO");
        assert_eq!(harness.read_file("a.txt.bak").await.unwrap(), "one\ntwo");
    }

    #[tokio::test]
    async fn test_delete_file_fails_when_absent() {
        let harness = Arc::new(MemoryHarness::new(&[]));
        let result = dispatch(
            &*harness,
            &ApplyPatchOperation::DeleteFile {
                path: "missing.txt".to_string(),
            },
            false,
            false,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delete_file_removes_entry() {
        let harness = Arc::new(MemoryHarness::new(&[("a.txt", "x")]));
        dispatch(
            &*harness,
            &ApplyPatchOperation::DeleteFile {
                path: "a.txt".to_string(),
            },
            false,
            false,
        )
        .await
        .unwrap();
        assert!(!harness.file_exists("a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_dry_run_skips_mutation_and_prefixes_output() {
        let harness = Arc::new(MemoryHarness::new(&[]));
        let output = dispatch(
            &*harness,
            &ApplyPatchOperation::CreateFile {
                path: "new.txt".to_string(),
                diff: "+hello".to_string(),
            },
            true,
            false,
        )
        .await
        .unwrap();
        assert!(output.starts_with("[DRY RUN] "));
        assert!(!harness.file_exists("new.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_patch_handler_returns_completed_status() {
        let harness: Arc<dyn FileSystemHarness> = Arc::new(MemoryHarness::new(&[]));
        let handler = apply_patch_handler(harness, false, false);
        let (status, output) = handler(ApplyPatchOperation::CreateFile {
            path: "f.txt".to_string(),
            diff: "+hi".to_string(),
        })
        .await;
        assert_eq!(status, BuiltinToolStatus::Completed);
        assert!(output.contains("created"));
    }

    #[tokio::test]
    async fn test_apply_patch_handler_returns_failed_status_on_error() {
        let harness: Arc<dyn FileSystemHarness> = Arc::new(MemoryHarness::new(&[]));
        let handler = apply_patch_handler(harness, false, false);
        let (status, _output) = handler(ApplyPatchOperation::DeleteFile {
            path: "missing.txt".to_string(),
        })
        .await;
        assert_eq!(status, BuiltinToolStatus::Failed);
    }
}
