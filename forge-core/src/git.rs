//! Thin wrapper around the `git` binary used by the Checkpoint Manager.
//!
//! Shells out rather than linking `git2`, matching the subprocess style the
//! rest of the control loop already uses for external tools. Transient
//! failures (lock contention, network hiccups on `fetch`-adjacent commands)
//! retry with exponential backoff; everything else surfaces immediately.

use crate::error::{ForgeError, ForgeResult};
use std::path::{Path, PathBuf};
use std::process::Command;

const DEFAULT_MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;

pub struct GitRepo {
    working_dir: PathBuf,
    commit_prefix: String,
    max_retries: u32,
}

impl GitRepo {
    pub fn new(working_dir: impl AsRef<Path>, commit_prefix: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            commit_prefix: commit_prefix.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    fn run(&self, args: &[&str]) -> ForgeResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .map_err(|e| ForgeError::git("execute", e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ForgeError::git(args.join(" "), stderr.to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run_with_retry(&self, args: &[&str]) -> ForgeResult<String> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match self.run(args) {
                Ok(out) => return Ok(out),
                Err(e) => {
                    if e.is_retryable() && attempt < self.max_retries {
                        let delay = RETRY_BASE_DELAY_MS * (1 << attempt);
                        std::thread::sleep(std::time::Duration::from_millis(delay));
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ForgeError::git("retry", "max retries exceeded")))
    }

    pub fn current_branch(&self) -> ForgeResult<String> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn current_commit(&self) -> ForgeResult<String> {
        self.run(&["rev-parse", "HEAD"])
    }

    pub fn has_uncommitted_changes(&self) -> ForgeResult<bool> {
        Ok(!self.run(&["status", "--porcelain"])?.is_empty())
    }

    /// Stage and commit everything under the working directory, prefixed
    /// with the checkpoint marker so `is_checkpoint_commit` can recognize it
    /// later. Returns the new commit's full hash.
    pub fn create_checkpoint_commit(&self, label: &str) -> ForgeResult<String> {
        self.run_with_retry(&["add", "-A"])?;
        if !self.has_uncommitted_changes()? {
            return self.current_commit();
        }
        let message = format!("{} {}", self.commit_prefix, label);
        self.run_with_retry(&["commit", "-m", &message])?;
        self.current_commit()
    }

    /// Hard reset to `commit_hash`, discarding working-tree changes. The
    /// caller is responsible for capturing whatever needs preserving first
    /// (e.g. via [`Self::create_checkpoint_commit`]).
    pub fn rollback_hard(&self, commit_hash: &str) -> ForgeResult<()> {
        self.run(&["cat-file", "-t", commit_hash])?;
        self.run_with_retry(&["reset", "--hard", commit_hash])?;
        Ok(())
    }

    pub fn is_checkpoint_commit(&self, message: &str) -> bool {
        message.starts_with(&self.commit_prefix)
    }

    /// Count of files that differ between two commits, used to report the
    /// blast radius of a rollback.
    pub fn diff_file_count(&self, from: &str, to: &str) -> ForgeResult<u32> {
        let out = self.run(&["diff", "--name-only", from, to])?;
        Ok(out.lines().filter(|l| !l.is_empty()).count() as u32)
    }

    /// SHA-256 over the sorted, concatenated contents of tracked files, used
    /// as a cheap tamper/drift signal alongside the git commit hash.
    pub fn tracked_files_hash(&self) -> ForgeResult<String> {
        let files = self.run(&["ls-files"])?;
        let mut paths: Vec<&str> = files.lines().collect();
        paths.sort_unstable();

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        for path in paths {
            let full = self.working_dir.join(path);
            if let Ok(bytes) = std::fs::read(&full) {
                hasher.update(path.as_bytes());
                hasher.update(&bytes);
            }
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, GitRepo) {
        let dir = tempdir().unwrap();
        for args in [
            vec!["init"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
        ] {
            Command::new("git").args(&args).current_dir(dir.path()).output().unwrap();
        }
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-m", "init"]).current_dir(dir.path()).output().unwrap();
        let repo = GitRepo::new(dir.path(), "[checkpoint]");
        (dir, repo)
    }

    #[test]
    fn checkpoint_commit_is_recognized() {
        let (dir, repo) = setup();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let hash = repo.create_checkpoint_commit("feature 1").unwrap();
        assert!(!hash.is_empty());
        assert!(!repo.has_uncommitted_changes().unwrap());
    }

    #[test]
    fn rollback_hard_restores_tree() {
        let (dir, repo) = setup();
        let base = repo.current_commit().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        repo.create_checkpoint_commit("feature 1").unwrap();
        repo.rollback_hard(&base).unwrap();
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn tracked_files_hash_changes_with_content() {
        let (dir, repo) = setup();
        let h1 = repo.tracked_files_hash().unwrap();
        std::fs::write(dir.path().join("README.md"), "changed").unwrap();
        let h2 = repo.tracked_files_hash().unwrap();
        assert_ne!(h1, h2);
    }
}
