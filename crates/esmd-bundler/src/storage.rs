//! Artifact and manifest storage.
//!
//! [`FsStorage`] writes artifacts as plain files under a root directory and
//! keeps build manifests in a redb table, keyed by build id.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use path_clean::PathClean;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

/// Manifest table: build id -> serialized manifest.
const MANIFEST_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("manifests");

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage database error: {0}")]
    DatabaseError(String),

    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::DatabaseError(err.to_string())
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a build manifest.
    async fn put(&self, id: &str, manifest: &[u8]) -> StorageResult<()>;

    async fn get(&self, id: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Write a build artifact at a relative path such as `builds/<id>`.
    async fn write_artifact(&self, path: &str, contents: &[u8]) -> StorageResult<()>;

    async fn read_artifact(&self, path: &str) -> StorageResult<Option<Vec<u8>>>;
}

pub struct FsStorage {
    root: PathBuf,
    db: Database,
}

impl std::fmt::Debug for FsStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsStorage").field("root", &self.root).finish_non_exhaustive()
    }
}

impl FsStorage {
    /// Open or create storage rooted at `root`.
    ///
    /// The manifest database lives at `<root>/manifests.redb`.
    pub fn open(root: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(root)?;
        let db = Database::create(root.join("manifests.redb"))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(MANIFEST_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            root: root.to_path_buf(),
            db,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of an artifact; rejects paths escaping the root.
    fn artifact_path(&self, path: &str) -> StorageResult<PathBuf> {
        let cleaned = Path::new(path).clean();
        let escapes = cleaned
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes || path.contains('\0') {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(cleaned))
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn put(&self, id: &str, manifest: &[u8]) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(MANIFEST_TABLE)?;
            table.insert(id, manifest)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    async fn get(&self, id: &str) -> StorageResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MANIFEST_TABLE)?;
        Ok(table.get(id)?.map(|v| v.value().to_vec()))
    }

    async fn write_artifact(&self, path: &str, contents: &[u8]) -> StorageResult<()> {
        let full = self.artifact_path(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, contents).await?;
        Ok(())
    }

    async fn read_artifact(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        let full = self.artifact_path(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
