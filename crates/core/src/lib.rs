pub mod catalog;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod hasher;
pub mod queue;
pub mod reconcile;
pub mod repository;
pub mod upload;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use catalog::Catalog;
use error::Result;
use reconcile::Reconciler;
use repository::PhotoRepository;
use upload::UploadHandler;

/// Everything needed to open a backup store.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Directory all uploaded files live under.
    pub root: PathBuf,
    /// SQLite file. Defaults to `<root>/../config/master.db`.
    pub database: Option<PathBuf>,
    pub queue_capacity: usize,
    pub idle_timeout: Duration,
}

impl BackupOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            database: None,
            queue_capacity: queue::DEFAULT_CAPACITY,
            idle_timeout: upload::session::DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.database {
            Some(path) => path.clone(),
            None => default_database_path(&self.root),
        }
    }
}

/// `<root>/../config/master.db`, or `config/master.db` for a bare root.
pub fn default_database_path(root: &Path) -> PathBuf {
    root.parent()
        .unwrap_or_else(|| Path::new(""))
        .join("config")
        .join("master.db")
}

/// The main entry point: one store, one writer, and the services built on it.
///
/// Constructed once per process and shared; every service holds the same
/// catalog so all writes funnel through a single queue.
#[derive(Clone)]
pub struct Backup {
    repo: PhotoRepository,
    uploads: UploadHandler,
    reconciler: Arc<Reconciler>,
}

impl Backup {
    /// Create the root if needed, open (or create and migrate) the store, and
    /// start its writer thread.
    pub fn open(options: &BackupOptions) -> Result<Self> {
        std::fs::create_dir_all(&options.root)?;
        let database = options.database_path();
        let catalog = Arc::new(Catalog::open(&database, options.queue_capacity)?);
        tracing::info!(
            root = %options.root.display(),
            database = %database.display(),
            "backup store opened"
        );

        let repo = PhotoRepository::new(catalog, options.root.clone());
        Ok(Self {
            uploads: UploadHandler::new(repo.clone(), options.idle_timeout),
            reconciler: Arc::new(Reconciler::new(repo.clone())),
            repo,
        })
    }

    pub fn repository(&self) -> &PhotoRepository {
        &self.repo
    }

    pub fn uploads(&self) -> &UploadHandler {
        &self.uploads
    }

    pub fn reconciler(&self) -> Arc<Reconciler> {
        Arc::clone(&self.reconciler)
    }

    /// Drop `*.uploading` files left behind by a previous run.
    pub fn cleanup_partial_uploads(&self) -> usize {
        reconcile::cleanup_partial_uploads(self.repo.root())
    }
}
