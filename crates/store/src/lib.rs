//! Persistence for diary entries: a uniform adapter over a local JSON
//! snapshot and a remote per-user document store.

pub mod error;
pub mod local;
pub mod migrate;
pub mod remote;
pub mod session;

use async_trait::async_trait;
use tokio::sync::watch;

use haru_entry::{DiaryEntry, HappinessAnalysis};

pub use error::StoreError;
pub use local::LocalStore;
pub use migrate::{MigrationReport, migrate_if_empty};
pub use remote::RemoteStore;
pub use session::{AuthState, Session};

/// Backend-agnostic contract over a keyed entry collection.
///
/// Every operation takes the session explicitly (there is no ambient
/// "current user"), so multiple sessions can coexist in one process.
/// `list_all` ordering (date descending, newest first) is a user-facing
/// invariant enforced by each adapter, never left to backend default order.
#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn list_all(&self, session: &Session) -> Result<Vec<DiaryEntry>, StoreError>;

    async fn find_by_date(
        &self,
        session: &Session,
        date: &str,
    ) -> Result<Option<DiaryEntry>, StoreError>;

    /// Replace the entry for `entry.date` in place when one exists (same
    /// identity), create it otherwise. Both paths stamp `updated_at`.
    async fn upsert(&self, session: &Session, entry: DiaryEntry) -> Result<DiaryEntry, StoreError>;

    /// Delete by date lookup. `Ok(None)` when no entry exists for the date;
    /// already-absent is not an error.
    async fn delete_by_date(
        &self,
        session: &Session,
        date: &str,
    ) -> Result<Option<String>, StoreError>;

    async fn load_analysis(
        &self,
        session: &Session,
    ) -> Result<Option<HappinessAnalysis>, StoreError>;

    /// Overwrite semantics: at most one analysis per user.
    async fn save_analysis(&self, session: &Session, analysis: &str) -> Result<(), StoreError>;

    /// Ordered whole-list snapshots. Each received value is fully
    /// authoritative and replaces any previously held list.
    async fn subscribe(
        &self,
        session: &Session,
    ) -> Result<watch::Receiver<Vec<DiaryEntry>>, StoreError>;
}

/// Sort newest-first. `YYYY-MM-DD` compares correctly as a plain string.
pub fn sort_newest_first(entries: &mut [DiaryEntry]) {
    entries.sort_by(|a, b| b.date.cmp(&a.date));
}
