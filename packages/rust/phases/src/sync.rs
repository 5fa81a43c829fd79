//! Repository sync phase: publish kb changes through git.
//!
//! The kb directory doubles as a git working tree. Publishing shells out to
//! the `git` binary rather than linking a git library: the operations are
//! four plain subcommands and the user's existing remotes, credentials, and
//! hooks keep working untouched.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use magpie_shared::{DataPaths, ItemRecord, MagpieError, Phase, Result};
use magpie_storage::Registry;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::kb_tree::{generate_root_index, synthesis_doc_path, write_text_atomic, ROOT_INDEX_NAME};
use crate::PhaseExecutor;

// ---------------------------------------------------------------------------
// Sync target
// ---------------------------------------------------------------------------

/// Destination for generated kb files.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// Publish the given paths (relative to the kb root) with a message.
    ///
    /// Publishing an unchanged set of paths is a successful no-op.
    async fn publish(&self, paths: &[PathBuf], message: &str) -> Result<()>;
}

/// [`SyncTarget`] backed by the `git` binary (add, commit, push).
pub struct GitSyncTarget {
    repo_dir: PathBuf,
    remote: String,
    branch: String,
    /// Items sync concurrently but share one git index.
    publish_lock: Mutex<()>,
}

impl GitSyncTarget {
    pub fn new(repo_dir: impl Into<PathBuf>, remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            remote: remote.into(),
            branch: branch.into(),
            publish_lock: Mutex::new(()),
        }
    }

    async fn run_git(&self, args: &[OsString]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .map_err(|e| MagpieError::Sync(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let subcommand = args
                .first()
                .map(|a| a.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MagpieError::Sync(format!(
                "git {subcommand} failed: {}",
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl SyncTarget for GitSyncTarget {
    async fn publish(&self, paths: &[PathBuf], message: &str) -> Result<()> {
        let _guard = self.publish_lock.lock().await;

        let mut add_args: Vec<OsString> = vec!["add".into(), "--".into()];
        add_args.extend(paths.iter().map(|p| p.as_os_str().to_os_string()));
        self.run_git(&add_args).await?;

        let mut status_args: Vec<OsString> =
            vec!["status".into(), "--porcelain".into(), "--".into()];
        status_args.extend(paths.iter().map(|p| p.as_os_str().to_os_string()));
        let status = self.run_git(&status_args).await?;

        if status.trim().is_empty() {
            debug!("no changes staged");
        } else {
            self.run_git(&["commit".into(), "-m".into(), message.into()])
                .await?;
        }

        // Push unconditionally so a commit whose push failed last time still
        // goes out on the retry; an up-to-date remote makes this a no-op.
        self.run_git(&[
            "push".into(),
            OsString::from(&self.remote),
            OsString::from(&self.branch),
        ])
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sync phase
// ---------------------------------------------------------------------------

/// Regenerates the root index and publishes one item's kb files.
pub struct SyncPhase {
    target: Arc<dyn SyncTarget>,
    registry: Arc<Registry>,
    paths: DataPaths,
}

impl SyncPhase {
    pub fn new(target: Arc<dyn SyncTarget>, registry: Arc<Registry>, paths: DataPaths) -> Self {
        Self { target, registry, paths }
    }
}

#[async_trait]
impl PhaseExecutor for SyncPhase {
    fn phase(&self) -> Phase {
        Phase::Sync
    }

    #[instrument(skip_all, fields(id = %record.id))]
    async fn execute(&self, record: &mut ItemRecord) -> Result<()> {
        let Some(doc_path) = record.kb_item_path.as_deref() else {
            return Err(MagpieError::validation("sync requires a generated document"));
        };

        // The index reflects the whole registry, so every sync rewrites it.
        let items = self.registry.list_items().await?;
        let index = generate_root_index(&items);
        write_text_atomic(&self.paths.kb_dir().join(ROOT_INDEX_NAME), &index).await?;

        let mut publish_paths = vec![PathBuf::from(ROOT_INDEX_NAME)];
        let doc_path = PathBuf::from(doc_path);
        publish_paths.push(doc_path.parent().map(Path::to_path_buf).unwrap_or(doc_path));
        if record.synthesized {
            if let Some((main, sub, _)) = record.category() {
                publish_paths.push(synthesis_doc_path(main, sub));
            }
        }

        let name = record.item_name.clone().unwrap_or_else(|| record.id.clone());
        let message = format!("Update knowledge base: {name}");
        self.target.publish(&publish_paths, &message).await?;

        info!(item = %name, "published to repository");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::kb_tree::item_doc_path;

    async fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .expect("run git");
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    /// A kb working tree with a local bare remote, both under one temp root.
    async fn init_repos() -> (PathBuf, PathBuf, PathBuf) {
        let root = std::env::temp_dir().join(format!("magpie_sync_test_{}", uuid::Uuid::now_v7()));
        let remote = root.join("remote.git");
        let kb = root.join("kb");
        std::fs::create_dir_all(&remote).expect("mkdir remote");
        std::fs::create_dir_all(&kb).expect("mkdir kb");

        git(&remote, &["init", "--bare"]).await;
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]).await;

        git(&kb, &["init"]).await;
        git(&kb, &["symbolic-ref", "HEAD", "refs/heads/main"]).await;
        git(&kb, &["config", "user.email", "magpie@example.com"]).await;
        git(&kb, &["config", "user.name", "Magpie"]).await;
        git(&kb, &["remote", "add", "origin", remote.to_str().expect("utf8 path")]).await;

        (root, kb, remote)
    }

    #[tokio::test]
    async fn publishes_and_is_idempotent() {
        let (root, kb, remote) = init_repos().await;
        let target = GitSyncTarget::new(&kb, "origin", "main");

        let doc = kb.join("rust/tips/README.md");
        std::fs::create_dir_all(doc.parent().expect("parent")).expect("mkdir");
        std::fs::write(&doc, "# Tips\n").expect("write doc");

        let paths = vec![PathBuf::from("rust/tips")];
        target
            .publish(&paths, "Update knowledge base: tips")
            .await
            .expect("first publish");

        let subject = git(&kb, &["log", "--format=%s", "-1"]).await;
        assert_eq!(subject.trim(), "Update knowledge base: tips");
        let remote_commits = git(&remote, &["rev-list", "--count", "main"]).await;
        assert_eq!(remote_commits.trim(), "1");

        // Unchanged tree: no new commit, publish still succeeds.
        target
            .publish(&paths, "Update knowledge base: tips")
            .await
            .expect("second publish");
        let remote_commits = git(&remote, &["rev-list", "--count", "main"]).await;
        assert_eq!(remote_commits.trim(), "1");

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn publish_outside_a_repository_fails() {
        let dir = std::env::temp_dir().join(format!("magpie_norepo_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let target = GitSyncTarget::new(&dir, "origin", "main");

        let err = target
            .publish(&[PathBuf::from("a.md")], "message")
            .await
            .expect_err("not a repo");
        assert!(matches!(err, MagpieError::Sync(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn sync_phase_publishes_item_and_index() {
        let (root, kb, remote) = init_repos().await;
        let paths = DataPaths { root: root.clone() };
        assert_eq!(paths.kb_dir(), kb);
        let registry = Arc::new(Registry::open(&paths.db_path()).await.expect("open registry"));

        let rel = item_doc_path("rust", "async-programming", "async-io-tips");
        let mut record = ItemRecord::new("21", "https://x.com/u/status/21");
        record.cached = true;
        record.categorized = true;
        record.main_category = Some("rust".into());
        record.sub_category = Some("async-programming".into());
        record.item_name = Some("async-io-tips".into());
        record.kb_item_generated = true;
        record.kb_item_path = Some(rel.display().to_string());
        registry.upsert_item(&record).await.expect("upsert");
        write_text_atomic(&kb.join(&rel), "# Async IO Tips\n").await.expect("write doc");

        let phase = SyncPhase::new(
            Arc::new(GitSyncTarget::new(&kb, "origin", "main")),
            registry,
            paths,
        );
        phase.execute(&mut record).await.expect("sync");

        let index = std::fs::read_to_string(kb.join("README.md")).expect("read index");
        assert!(index.contains("async-io-tips"));

        let subject = git(&kb, &["log", "--format=%s", "-1"]).await;
        assert_eq!(subject.trim(), "Update knowledge base: async-io-tips");
        let remote_files = git(&remote, &["ls-tree", "-r", "--name-only", "main"]).await;
        assert!(remote_files.contains("rust/async-programming/async-io-tips/README.md"));
        assert!(remote_files.contains("README.md"));

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn sync_without_document_fails() {
        let root = std::env::temp_dir().join(format!("magpie_syncval_{}", uuid::Uuid::now_v7()));
        let paths = DataPaths { root: root.clone() };
        let registry = Arc::new(Registry::open(&paths.db_path()).await.expect("open registry"));
        let phase = SyncPhase::new(
            Arc::new(GitSyncTarget::new(paths.kb_dir(), "origin", "main")),
            registry,
            paths,
        );

        let mut record = ItemRecord::new("22", "https://x.com/u/status/22");
        let err = phase.execute(&mut record).await.expect_err("no document");
        assert!(matches!(err, MagpieError::Validation { .. }));

        std::fs::remove_dir_all(&root).ok();
    }
}
