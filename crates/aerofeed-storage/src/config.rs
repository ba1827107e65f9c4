//! Backend selection.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::{
    DuckDbStore, FileSystemStore, FlightStore, GitHubContentsClient, GitHubStore, SqliteStore,
    StorageBackend, StorageError,
};

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_GITHUB_BRANCH: &str = "main";

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct GitHubConfig {
    #[serde(skip_serializing)]
    pub token: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub api_url: String,
    /// Directory inside the repository that holds the airport folders.
    pub base_path: String,
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &"<redacted>")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("api_url", &self.api_url)
            .field("base_path", &self.base_path)
            .finish()
    }
}

/// Which backend to open, with everything it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    FileSystem { base_dir: PathBuf },
    GitHub(GitHubConfig),
    DuckDb { path: PathBuf },
    Sqlite { url: String },
}

impl StorageConfig {
    pub const fn backend(&self) -> StorageBackend {
        match self {
            Self::FileSystem { .. } => StorageBackend::FileSystem,
            Self::GitHub(_) => StorageBackend::GitHub,
            Self::DuckDb { .. } => StorageBackend::DuckDb,
            Self::Sqlite { .. } => StorageBackend::Sqlite,
        }
    }
}

/// Opens the configured backend once; callers share the returned handle.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn FlightStore>, StorageError> {
    let store: Arc<dyn FlightStore> = match config {
        StorageConfig::FileSystem { base_dir } => Arc::new(FileSystemStore::new(base_dir.clone())),
        StorageConfig::GitHub(github) => {
            let client = GitHubContentsClient::new(
                github.api_url.clone(),
                github.owner.clone(),
                github.repo.clone(),
                github.branch.clone(),
                github.token.clone(),
            )?;
            Arc::new(GitHubStore::new(Arc::new(client), github.base_path.clone()))
        }
        StorageConfig::DuckDb { path } => Arc::new(DuckDbStore::open(path.clone()).await?),
        StorageConfig::Sqlite { url } => Arc::new(SqliteStore::connect(url).await?),
    };

    tracing::info!(backend = %store.backend(), "storage backend ready");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_config_debug_hides_token() {
        let config = GitHubConfig {
            token: String::from("ghp_secret"),
            owner: String::from("octo"),
            repo: String::from("flights"),
            branch: String::from(DEFAULT_GITHUB_BRANCH),
            api_url: String::from(DEFAULT_GITHUB_API_URL),
            base_path: String::from("data"),
        };

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("octo"));
    }

    #[tokio::test]
    async fn open_store_reports_selected_backend() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = StorageConfig::FileSystem {
            base_dir: temp.path().to_path_buf(),
        };

        let store = open_store(&config).await.expect("open");
        assert_eq!(store.backend(), config.backend());
        assert_eq!(store.backend(), StorageBackend::FileSystem);
    }
}
