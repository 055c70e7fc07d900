use crate::error::EngineError;
use crate::session::types::SessionId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use tokio::fs as async_fs;
use tracing::{debug, info};

/// External document-store collaborator, keyed by session id.
///
/// The engine treats every call as atomic with no partial writes and never
/// interprets the stored document beyond handing it to the store layer for
/// validation.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Load the raw document for a session, or `None` if absent.
    async fn load(&self, session_id: SessionId) -> Result<Option<serde_json::Value>, EngineError>;

    /// Persist the raw document for a session, replacing any previous value.
    async fn save(
        &self,
        session_id: SessionId,
        document: serde_json::Value,
    ) -> Result<(), EngineError>;
}

/// In-memory repository, the default for embedding and tests.
#[derive(Default)]
pub struct MemoryRepository {
    documents: DashMap<SessionId, serde_json::Value>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn load(&self, session_id: SessionId) -> Result<Option<serde_json::Value>, EngineError> {
        Ok(self.documents.get(&session_id).map(|doc| doc.clone()))
    }

    async fn save(
        &self,
        session_id: SessionId,
        document: serde_json::Value,
    ) -> Result<(), EngineError> {
        self.documents.insert(session_id, document);
        Ok(())
    }
}

/// File-backed repository storing one JSON document per session.
///
/// Writes go to a temp file first and are moved into place with a rename, so
/// a crash mid-save never leaves a truncated record behind.
pub struct FileRepository {
    root: PathBuf,
}

impl FileRepository {
    pub fn new(root: PathBuf) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&root)
            .map_err(|e| EngineError::Storage(format!("create {}: {}", root.display(), e)))?;
        info!("File repository at {}", root.display());
        Ok(Self { root })
    }

    fn session_file(&self, session_id: SessionId) -> PathBuf {
        self.root.join(format!("{}.json", session_id))
    }
}

#[async_trait]
impl SessionRepository for FileRepository {
    async fn load(&self, session_id: SessionId) -> Result<Option<serde_json::Value>, EngineError> {
        let path = self.session_file(session_id);
        let content = match async_fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EngineError::Storage(format!(
                    "read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let document = serde_json::from_slice(&content).map_err(|e| {
            EngineError::CorruptedSessionData {
                session_id,
                reason: format!("unparseable document: {}", e),
            }
        })?;
        debug!("Loaded session document {} ({} bytes)", session_id, content.len());
        Ok(Some(document))
    }

    async fn save(
        &self,
        session_id: SessionId,
        document: serde_json::Value,
    ) -> Result<(), EngineError> {
        let path = self.session_file(session_id);
        let tmp_path = self.root.join(format!("{}.json.tmp", session_id));

        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;

        async_fs::write(&tmp_path, &bytes).await.map_err(|e| {
            EngineError::Storage(format!("write {}: {}", tmp_path.display(), e))
        })?;
        async_fs::rename(&tmp_path, &path).await.map_err(|e| {
            EngineError::Storage(format!("rename into {}: {}", path.display(), e))
        })?;

        debug!("Saved session document {} ({} bytes)", session_id, bytes.len());
        Ok(())
    }
}
