//! Media delegate: hands staged uploads to an external store and cleans up after them.

mod local;
mod remote;
pub mod staging;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::params;

use crate::config::{Config, MediaBackend};
use crate::db::models::StoredMedia;
use crate::db::now_timestamp;
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

pub use self::local::LocalMediaStore;
pub use self::remote::HttpMediaStore;
pub use self::staging::{read_form, FileRule, StagedFile, UploadForm};

/// External object storage. Keys are `<folder>/<name>` and double as storage ids.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store the staged file under `key`, returning its public URL.
    async fn put(&self, file: &StagedFile, key: &str) -> anyhow::Result<String>;

    /// Remove a stored object. Removing an absent object succeeds.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

pub fn build_store(config: &Config) -> anyhow::Result<Arc<dyn MediaStore>> {
    Ok(match config.media.backend {
        MediaBackend::Local => Arc::new(LocalMediaStore::new(
            config.media_local_dir(),
            config.media.public_base_url.clone(),
        )),
        MediaBackend::Http => {
            let endpoint = config
                .media
                .endpoint
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("media.endpoint is required for the http backend"))?;
            Arc::new(HttpMediaStore::new(
                endpoint,
                config.media.api_key.clone(),
                config.media.public_base_url.clone(),
            )?)
        }
    })
}

#[derive(Clone)]
pub struct MediaDelegate {
    store: Arc<dyn MediaStore>,
    folder: String,
    db: DbPool,
}

impl MediaDelegate {
    pub fn new(store: Arc<dyn MediaStore>, folder: impl Into<String>, db: DbPool) -> Self {
        Self {
            store,
            folder: folder.into(),
            db,
        }
    }

    fn key_for(&self, file: &StagedFile) -> String {
        let ext = Path::new(&file.original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        format!("{}/{}{}", self.folder, uuid::Uuid::now_v7(), ext)
    }

    /// Upload one staged file. The staged copy is always removed; failures
    /// are logged and reported as `None`.
    pub async fn upload(&self, file: StagedFile) -> Option<StoredMedia> {
        let key = self.key_for(&file);
        let result = self.store.put(&file, &key).await;

        if let Err(e) = tokio::fs::remove_file(&file.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove staged file {}: {}", file.path.display(), e);
            }
        }

        match result {
            Ok(url) => Some(StoredMedia {
                name: file.original_name.clone(),
                kind: file.kind,
                url,
                storage_id: key,
            }),
            Err(e) => {
                tracing::warn!(original = %file.original_name, "Media upload failed: {:#}", e);
                None
            }
        }
    }

    /// Upload files in order. The first failure aborts the batch: files
    /// already stored for this batch are removed again and the remaining
    /// staged files are discarded.
    pub async fn upload_all(&self, files: Vec<StagedFile>) -> AppResult<Vec<StoredMedia>> {
        let mut stored = Vec::with_capacity(files.len());
        let mut pending = files.into_iter();

        while let Some(file) = pending.next() {
            match self.upload(file).await {
                Some(media) => stored.push(media),
                None => {
                    drop(pending);
                    self.compensate(&stored).await;
                    return Err(AppError::UploadFailed);
                }
            }
        }

        Ok(stored)
    }

    /// Best-effort removal of media that will never be referenced.
    pub async fn compensate(&self, media: &[StoredMedia]) {
        for m in media {
            self.remove(&m.storage_id).await;
        }
    }

    /// Best-effort removal. A failure is logged and recorded in the orphan
    /// ledger; it never propagates. Returns whether the removal succeeded.
    pub async fn remove(&self, storage_id: &str) -> bool {
        match self.store.delete(storage_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(storage_id, "Media removal failed: {:#}", e);
                self.record_orphan(storage_id, &format!("{:#}", e));
                false
            }
        }
    }

    pub async fn remove_all(&self, storage_ids: &[String]) -> usize {
        let mut failed = 0;
        for id in storage_ids {
            if !self.remove(id).await {
                failed += 1;
            }
        }
        failed
    }

    fn record_orphan(&self, storage_id: &str, reason: &str) {
        let result = self.db.get().map_err(AppError::from).and_then(|conn| {
            conn.execute(
                "INSERT INTO orphaned_media (storage_id, reason, recorded_at) VALUES (?1, ?2, ?3)",
                params![storage_id, reason, now_timestamp()],
            )
            .map_err(AppError::from)
        });
        if let Err(e) = result {
            tracing::error!(storage_id, "Could not record orphaned media: {}", e);
        }
    }
}

/// Orphaned storage ids awaiting manual reconciliation, oldest first.
pub fn orphaned(conn: &rusqlite::Connection) -> AppResult<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT storage_id FROM orphaned_media ORDER BY recorded_at ASC, rowid ASC")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// In-memory store with switchable failures.
    #[derive(Default)]
    pub struct MemoryStore {
        pub objects: Mutex<HashSet<String>>,
        pub fail_puts_after: Mutex<Option<usize>>,
        pub fail_deletes: Mutex<bool>,
        puts: Mutex<usize>,
    }

    #[async_trait]
    impl MediaStore for MemoryStore {
        async fn put(&self, _file: &StagedFile, key: &str) -> anyhow::Result<String> {
            let mut puts = self.puts.lock().unwrap();
            if let Some(limit) = *self.fail_puts_after.lock().unwrap() {
                if *puts >= limit {
                    anyhow::bail!("store unavailable");
                }
            }
            *puts += 1;
            self.objects.lock().unwrap().insert(key.to_string());
            Ok(format!("https://cdn.test/{}", key))
        }

        async fn delete(&self, key: &str) -> anyhow::Result<()> {
            if *self.fail_deletes.lock().unwrap() {
                anyhow::bail!("delete refused");
            }
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }
    }

    pub fn stage(dir: &Path, name: &str) -> StagedFile {
        let path = dir.join(format!("{}-{}", uuid::Uuid::now_v7(), name));
        std::fs::write(&path, b"bytes").unwrap();
        StagedFile {
            field: "media".into(),
            path,
            original_name: name.into(),
            content_type: "image/png".into(),
            kind: crate::db::models::MediaKind::Image,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn delegate(store: Arc<MemoryStore>) -> (tempfile::TempDir, MediaDelegate) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = crate::db::create_pool(&tmp.path().join("media.db")).unwrap();
        crate::db::run_migrations(&pool).unwrap();
        (tmp, MediaDelegate::new(store, "chirp-media", pool))
    }

    #[tokio::test]
    async fn upload_removes_staged_file_on_success() {
        let store = Arc::new(MemoryStore::default());
        let (tmp, media) = delegate(store.clone());
        let staged = stage(tmp.path(), "cat.PNG");
        let path = staged.path.clone();

        let stored = media.upload(staged).await.unwrap();
        assert!(!path.exists());
        assert!(stored.storage_id.starts_with("chirp-media/"));
        assert!(stored.storage_id.ends_with(".png"));
        assert_eq!(stored.name, "cat.PNG");
        assert!(store.objects.lock().unwrap().contains(&stored.storage_id));
    }

    #[tokio::test]
    async fn upload_removes_staged_file_on_failure() {
        let store = Arc::new(MemoryStore::default());
        *store.fail_puts_after.lock().unwrap() = Some(0);
        let (tmp, media) = delegate(store);
        let staged = stage(tmp.path(), "cat.png");
        let path = staged.path.clone();

        assert!(media.upload(staged).await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_batch_rolls_back_earlier_uploads() {
        let store = Arc::new(MemoryStore::default());
        *store.fail_puts_after.lock().unwrap() = Some(1);
        let (tmp, media) = delegate(store.clone());
        let files = vec![
            stage(tmp.path(), "a.png"),
            stage(tmp.path(), "b.png"),
            stage(tmp.path(), "c.png"),
        ];
        let paths: Vec<_> = files.iter().map(|f| f.path.clone()).collect();

        let err = media.upload_all(files).await.unwrap_err();
        assert!(matches!(err, AppError::UploadFailed));
        assert!(store.objects.lock().unwrap().is_empty());
        assert!(paths.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn failed_removal_lands_in_orphan_ledger() {
        let store = Arc::new(MemoryStore::default());
        *store.fail_deletes.lock().unwrap() = true;
        let (_tmp, media) = delegate(store);

        let failed = media
            .remove_all(&["chirp-media/a".to_string(), "chirp-media/b".to_string()])
            .await;
        assert_eq!(failed, 2);

        let conn = media.db.get().unwrap();
        assert_eq!(orphaned(&conn).unwrap(), vec!["chirp-media/a", "chirp-media/b"]);
    }
}
