//! Shared run context: the persistence handle, configuration, and project
//! root, bundled into one value and passed by reference instead of reached
//! for through globals or thread-locals.

use crate::config::Config;
use crate::persistence::Store;
use std::path::{Path, PathBuf};

/// Everything the Orchestrator and its components need to act on a single
/// project. Cheap to clone: `Store` is an `Arc`-backed handle internally.
#[derive(Clone)]
pub struct Context {
    pub store: Store,
    pub config: Config,
    project_dir: PathBuf,
}

impl Context {
    /// Open the persistence store for `project_dir` and load its
    /// configuration. This is the one place both get constructed together.
    pub async fn open(project_dir: impl Into<PathBuf>) -> crate::error::ForgeResult<Self> {
        let project_dir = project_dir.into();
        let config = Config::load(&project_dir)?;
        let store = Store::open(Config::db_path(&project_dir)).await?;
        Ok(Self {
            store,
            config,
            project_dir,
        })
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn arcadia_dir(&self) -> PathBuf {
        self.project_dir.join(".arcadia")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_store_and_loads_config() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::open(dir.path()).await.unwrap();
        assert_eq!(ctx.project_dir(), dir.path());
        assert!(ctx.arcadia_dir().join("project.db").exists());
    }
}
