//! In-memory implementations of the storage ports.
//!
//! Both stores sit on `scc::HashMap`, so lookups never take a lock held
//! across an await point.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scc::hash_map::Entry;

use crate::{
    adapters::file_system::FileSystemAdapter,
    core::Blob,
    ports::{
        content_store::{ContentStore, ContentStoreError, ContentStoreResult},
        file_system::FileSystemResult,
        session_store::{SessionRecord, SessionResult, SessionStore},
    },
};

/// Blob store keyed by file name.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blobs: scc::HashMap<String, Blob>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `blob` under its file name, replacing any previous version in
    /// place. Readers see either the old or the new blob, never a gap.
    pub async fn insert(&self, blob: Blob) {
        match self.blobs.entry_async(blob.file_name.clone()).await {
            Entry::Occupied(mut entry) => *entry.get_mut() = blob,
            Entry::Vacant(entry) => {
                entry.insert_entry(blob);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Load every regular file directly inside `dir` as a blob.
    ///
    /// The MIME type is left unset and the file's modification time becomes
    /// the blob's timestamp. Returns the number of blobs loaded.
    pub async fn load_dir(&self, file_system: &FileSystemAdapter, dir: &str) -> FileSystemResult<usize> {
        let mut loaded = 0;
        for name in file_system.list_files(dir, "/").await? {
            let content = file_system.read_file(dir, &name).await?;
            let modified_at = tokio::fs::metadata(std::path::Path::new(dir).join(&name))
                .await
                .and_then(|metadata| metadata.modified())
                .ok()
                .map(DateTime::<Utc>::from);

            let mut blob = Blob::new(name, content);
            blob.modified_at = modified_at;
            self.insert(blob).await;
            loaded += 1;
        }
        tracing::info!(dir = %dir, blobs = loaded, "seeded content store");
        Ok(loaded)
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn find_blob(&self, file_name: &str) -> ContentStoreResult<Blob> {
        self.blobs
            .get_async(file_name)
            .await
            .map(|entry| entry.get().clone())
            .ok_or_else(|| ContentStoreError::NotFound(file_name.to_string()))
    }
}

/// Session store. Expired sessions are dropped when loaded and swept on
/// every save.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: scc::HashMap<String, (SessionRecord, DateTime<Utc>)>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session that expired before `now`. Returns how many went.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain_async(|_, (_, expires_at)| *expires_at > now)
            .await;
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            tracing::debug!(purged, "swept expired sessions");
        }
        purged
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, token: &str) -> SessionResult<Option<SessionRecord>> {
        let Some((record, expires_at)) = self
            .sessions
            .get_async(token)
            .await
            .map(|entry| entry.get().clone())
        else {
            return Ok(None);
        };

        if expires_at <= Utc::now() {
            let _ = self.sessions.remove_async(token).await;
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn save(
        &self,
        token: &str,
        record: SessionRecord,
        expires_at: DateTime<Utc>,
    ) -> SessionResult<()> {
        match self.sessions.entry_async(token.to_string()).await {
            Entry::Occupied(mut entry) => *entry.get_mut() = (record, expires_at),
            Entry::Vacant(entry) => {
                entry.insert_entry((record, expires_at));
            }
        }
        self.purge_expired(Utc::now()).await;
        Ok(())
    }

    async fn delete(&self, token: &str) -> SessionResult<()> {
        let _ = self.sessions.remove_async(token).await;
        Ok(())
    }
}
