use haru_entry::DiaryEntry;

use crate::error::StoreError;
use crate::session::Session;
use crate::EntryStore;

/// Outcome of a [`migrate_if_empty`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Entries copied into the destination.
    pub migrated: usize,
    /// True when the destination already held entries and nothing was copied.
    pub destination_populated: bool,
}

/// One-time local→remote hand-off: copy every source entry into the
/// destination, but only when the destination is still empty.
///
/// Explicit and idempotent: run it once at session start, never mid-
/// operation. A second run finds the destination populated and becomes a
/// no-op, so entries are never duplicated. After a successful run the
/// destination is the source of truth; the source snapshot is superseded.
pub async fn migrate_if_empty(
    src: &dyn EntryStore,
    dst: &dyn EntryStore,
    session: &Session,
) -> Result<MigrationReport, StoreError> {
    let existing = dst.list_all(session).await?;
    if !existing.is_empty() {
        tracing::info!(
            entries = existing.len(),
            "destination store already populated, skipping migration"
        );
        return Ok(MigrationReport {
            migrated: 0,
            destination_populated: true,
        });
    }

    // Source adapters normalize on load, so every entry arriving here is
    // already canonical; malformed source records were dropped there.
    let entries: Vec<DiaryEntry> = src.list_all(session).await?;
    let mut migrated = 0;
    for mut entry in entries {
        // Identity is assigned by the destination backend.
        entry.id = None;
        dst.upsert(session, entry).await?;
        migrated += 1;
    }

    tracing::info!(migrated, "local entries migrated to remote store");
    Ok(MigrationReport {
        migrated,
        destination_populated: false,
    })
}

// ── Tests ────────────────────────────────────────────────────────────────────
