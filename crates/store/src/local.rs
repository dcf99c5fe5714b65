use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, watch};

use haru_entry::{DiaryEntry, HappinessAnalysis, Normalizer};

use crate::error::StoreError;
use crate::session::Session;
use crate::{EntryStore, sort_newest_first};

/// Filename of the whole-list entry snapshot, matching the legacy
/// browser-storage key.
const DIARY_KEY: &str = "happyDiary";
/// Filename of the single analysis string.
const ANALYSIS_KEY: &str = "happinessAnalysisResult";

/// Local-only backend: the whole entry list lives in one serialized JSON
/// block on disk. Single-user — the session argument is accepted for
/// interface uniformity and ignored.
///
/// Every record read from disk passes through the [`Normalizer`], so a
/// malformed record is dropped (and logged) rather than aborting the load.
#[derive(Debug)]
pub struct LocalStore {
    dir: PathBuf,
    normalizer: Normalizer,
    snapshots: watch::Sender<Vec<DiaryEntry>>,
    // Serializes load-modify-write cycles against concurrent mutations.
    write_lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>, normalizer: Normalizer) -> Self {
        let (snapshots, _) = watch::channel(Vec::new());
        Self {
            dir: dir.into(),
            normalizer,
            snapshots,
            write_lock: Mutex::new(()),
        }
    }

    fn diary_path(&self) -> PathBuf {
        self.dir.join(format!("{DIARY_KEY}.json"))
    }

    fn analysis_path(&self) -> PathBuf {
        self.dir.join(format!("{ANALYSIS_KEY}.json"))
    }

    async fn load(&self) -> Result<Vec<DiaryEntry>, StoreError> {
        let raw = match tokio::fs::read(self.diary_path()).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let raws: Vec<Value> = serde_json::from_slice(&raw)?;
        let mut entries = self.normalizer.normalize_all(&raws);
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    async fn persist(&self, entries: &[DiaryEntry]) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(entries)?;
        write_atomic(&self.diary_path(), &body).await?;
        self.snapshots.send_replace(entries.to_vec());
        Ok(())
    }
}

#[async_trait]
impl EntryStore for LocalStore {
    async fn list_all(&self, _session: &Session) -> Result<Vec<DiaryEntry>, StoreError> {
        self.load().await
    }

    async fn find_by_date(
        &self,
        _session: &Session,
        date: &str,
    ) -> Result<Option<DiaryEntry>, StoreError> {
        Ok(self.load().await?.into_iter().find(|e| e.date == date))
    }

    async fn upsert(
        &self,
        _session: &Session,
        mut entry: DiaryEntry,
    ) -> Result<DiaryEntry, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;

        let now = Utc::now();
        entry.updated_at = Some(now);
        match entries.iter().position(|e| e.date == entry.date) {
            Some(idx) => {
                // Replace in place: same identity, original creation stamp.
                entry.created_at = entries[idx].created_at.or(Some(now));
                entries[idx] = entry.clone();
            }
            None => {
                entry.created_at = Some(now);
                entries.push(entry.clone());
            }
        }

        sort_newest_first(&mut entries);
        self.persist(&entries).await?;
        Ok(entry)
    }

    async fn delete_by_date(
        &self,
        _session: &Session,
        date: &str,
    ) -> Result<Option<String>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        let Some(idx) = entries.iter().position(|e| e.date == date) else {
            return Ok(None);
        };

        let removed = entries.remove(idx);
        self.persist(&entries).await?;
        // Local storage has no opaque document id; the date is the identity.
        Ok(Some(removed.id.unwrap_or(removed.date)))
    }

    async fn load_analysis(
        &self,
        _session: &Session,
    ) -> Result<Option<HappinessAnalysis>, StoreError> {
        let raw = match tokio::fs::read(self.analysis_path()).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        // Stored as one serialized JSON string, not a structured document.
        let analysis: String = serde_json::from_slice(&raw)?;
        Ok(Some(HappinessAnalysis {
            analysis,
            updated_at: None,
        }))
    }

    async fn save_analysis(&self, _session: &Session, analysis: &str) -> Result<(), StoreError> {
        let body = serde_json::to_vec(&analysis)?;
        write_atomic(&self.analysis_path(), &body).await
    }

    async fn subscribe(
        &self,
        _session: &Session,
    ) -> Result<watch::Receiver<Vec<DiaryEntry>>, StoreError> {
        // Seed the channel so new subscribers start from the persisted state.
        let entries = self.load().await?;
        self.snapshots.send_replace(entries);
        Ok(self.snapshots.subscribe())
    }
}

/// Write to a `.tmp` sibling, fsync, then rename over the target. A crash
/// before the rename leaves the previous snapshot untouched; a crash after
/// leaves a consistent new one.
async fn write_atomic(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "snapshot.json".to_string());
        path.with_file_name(format!("{filename}.tmp"))
    };

    let write_result: Result<(), StoreError> = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;
        file.write_all(body).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
    .await;

    if let Err(err) = write_result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err.into());
    }

    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────
