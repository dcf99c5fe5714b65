use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use haru_entry::{DiaryEntry, MAX_ITEM_CHARS, SLOT_COUNT, is_valid_date, truncate_chars};
use haru_gateway::{FeedbackGateway, GatewayError};
use haru_store::{AuthState, EntryStore, StoreError, sort_newest_first};

use crate::confirm::Confirm;

/// Where the controller currently is in its operation cycle. UIs subscribe
/// via [`DiaryController::watch_phase`] and disable inputs outside `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    Saving,
    Analyzing,
    Deleting,
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("write at least one happy moment before saving")]
    EmptyDraft,
    #[error("there are no diary entries to analyze yet")]
    NothingToAnalyze,
    #[error("{0:?} is not a YYYY-MM-DD calendar day")]
    InvalidDate(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Saved(DiaryEntry),
    /// The user declined to overwrite an existing entry; nothing changed.
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(String),
    /// No entry existed for the date; treated as already absent.
    NotFound,
    Declined,
}

/// In-memory view: the selected-date cursor, the working draft, and the
/// rendered entry list. Rebuilt from the store after every mutation rather
/// than patched incrementally.
#[derive(Debug)]
struct Cursor {
    selected_date: String,
    draft: Vec<String>,
    entries: Vec<DiaryEntry>,
    feedback: String,
}

impl Cursor {
    /// Point the draft and displayed feedback at the selected date's entry,
    /// or at blanks when none exists.
    fn sync_view_to_selection(&mut self) {
        match self.entries.iter().find(|e| e.date == self.selected_date) {
            Some(entry) => {
                let mut draft = entry.items.clone();
                draft.resize(SLOT_COUNT, String::new());
                self.draft = draft;
                self.feedback = entry.ai_feedback.clone();
            }
            None => {
                self.draft = blank_draft();
                self.feedback.clear();
            }
        }
    }
}

/// Orchestrates load → normalize → merge-with-draft → save-on-submit over
/// one logical selected-date cursor.
///
/// All mutating operations run under one async mutex, so a late-arriving
/// reload can never race a concurrent delete within a session. None of the
/// operations are cancellable once started.
pub struct DiaryController {
    store: Arc<dyn EntryStore>,
    gateway: Arc<dyn FeedbackGateway>,
    auth: AuthState,
    phase: watch::Sender<Phase>,
    cursor: Mutex<Cursor>,
}

impl DiaryController {
    pub fn new(
        store: Arc<dyn EntryStore>,
        gateway: Arc<dyn FeedbackGateway>,
        auth: AuthState,
    ) -> Self {
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            store,
            gateway,
            auth,
            phase,
            cursor: Mutex::new(Cursor {
                selected_date: today,
                draft: blank_draft(),
                entries: Vec::new(),
                feedback: String::new(),
            }),
        }
    }

    // ── Operations ──────────────────────────────────────────────────────────

    /// Move the cursor to `date`: reload the full list and point the draft
    /// and displayed feedback at that date's entry (or at blanks). Selecting
    /// never saves anything.
    pub async fn select_date(&self, date: &str) -> Result<(), ControllerError> {
        if !is_valid_date(date) {
            return Err(ControllerError::InvalidDate(date.to_string()));
        }

        let mut cursor = self.cursor.lock().await;
        self.set_phase(Phase::Loading);
        let result = self.reload(&mut cursor).await;
        self.set_phase(Phase::Idle);
        result?;

        cursor.selected_date = date.to_string();
        cursor.sync_view_to_selection();
        Ok(())
    }

    /// Save the draft for the selected date.
    ///
    /// An all-blank draft is rejected before the gateway is ever called.
    /// When an entry already exists for the date, `confirm` gates the
    /// overwrite — a decline changes nothing. Feedback is fetched before
    /// the entry is written, so a gateway failure leaves the prior entry
    /// (if any) untouched.
    pub async fn submit(
        &self,
        draft_items: &[String],
        confirm: &dyn Confirm,
    ) -> Result<SubmitOutcome, ControllerError> {
        let mut cursor = self.cursor.lock().await;

        let draft = sanitize_draft(draft_items);
        if draft.iter().all(|item| item.is_empty()) {
            return Err(ControllerError::EmptyDraft);
        }

        let date = cursor.selected_date.clone();
        // The existence check must hit the store: the in-memory list may not
        // have been loaded yet, and a stale miss here would skip the gate.
        let session = self.auth.require_session()?;
        if self.store.find_by_date(&session, &date).await?.is_some() {
            let prompt =
                format!("An entry already exists for {date}. Replace it with the current draft?");
            if !confirm.confirm(&prompt) {
                return Ok(SubmitOutcome::Declined);
            }
        }

        self.set_phase(Phase::Saving);
        let result = self.save_draft(&mut cursor, draft).await;
        self.set_phase(Phase::Idle);
        result
    }

    /// Analyze the whole diary: every non-empty moment across all entries,
    /// flattened in list order, goes to the gateway in one request; the
    /// result overwrites the previously saved analysis.
    pub async fn request_analysis(&self) -> Result<String, ControllerError> {
        let mut cursor = self.cursor.lock().await;
        let session = self.auth.require_session()?;

        cursor.entries = self.store.list_all(&session).await?;
        if cursor.entries.is_empty() {
            return Err(ControllerError::NothingToAnalyze);
        }
        let moments = cursor
            .entries
            .iter()
            .flat_map(|e| e.non_empty_items().map(str::to_string))
            .collect::<Vec<_>>();

        self.set_phase(Phase::Analyzing);
        let result = async {
            let analysis = self.gateway.analysis(&moments).await?;
            self.store.save_analysis(&session, &analysis).await?;
            Ok(analysis)
        }
        .await;
        self.set_phase(Phase::Idle);
        result
    }

    /// Delete the entry for `date` after confirmation. An absent date is a
    /// no-op, not an error. Deleting the selected date clears the draft and
    /// the displayed feedback.
    pub async fn delete_entry(
        &self,
        date: &str,
        confirm: &dyn Confirm,
    ) -> Result<DeleteOutcome, ControllerError> {
        let mut cursor = self.cursor.lock().await;

        let prompt = format!("Delete the entry for {date}? This cannot be undone.");
        if !confirm.confirm(&prompt) {
            return Ok(DeleteOutcome::Declined);
        }

        self.set_phase(Phase::Deleting);
        let result = self.perform_delete(&mut cursor, date).await;
        self.set_phase(Phase::Idle);
        result
    }

    /// Replace the in-memory list with a push snapshot. Snapshots are fully
    /// authoritative for the list and the displayed feedback; the draft is
    /// the user's in-progress edit and stays untouched.
    pub async fn apply_snapshot(&self, mut entries: Vec<DiaryEntry>) {
        sort_newest_first(&mut entries);
        let mut cursor = self.cursor.lock().await;
        cursor.entries = entries;
        cursor.feedback = cursor
            .entries
            .iter()
            .find(|e| e.date == cursor.selected_date)
            .map(|e| e.ai_feedback.clone())
            .unwrap_or_default();
    }

    /// Rebuild the in-memory list from the store.
    pub async fn refresh(&self) -> Result<(), ControllerError> {
        let mut cursor = self.cursor.lock().await;
        self.reload(&mut cursor).await
    }

    pub async fn saved_analysis(&self) -> Result<Option<String>, ControllerError> {
        let session = self.auth.require_session()?;
        Ok(self
            .store
            .load_analysis(&session)
            .await?
            .map(|a| a.analysis))
    }

    // ── Subscriptions ───────────────────────────────────────────────────────

    /// Consume store push snapshots until the sender goes away.
    pub fn spawn_snapshot_watcher(
        self: &Arc<Self>,
        mut rx: watch::Receiver<Vec<DiaryEntry>>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                controller.apply_snapshot(snapshot).await;
            }
        })
    }

    /// Follow sign-in state: a sign-in reloads the list for the new user, a
    /// sign-out clears everything. Ends (unsubscribes) when the auth source
    /// is dropped.
    pub fn spawn_auth_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let mut rx = self.auth.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let signed_in = rx.borrow_and_update().is_some();
                if signed_in {
                    if let Err(err) = controller.refresh().await {
                        tracing::warn!(error = %err, "reload after sign-in failed");
                    }
                } else {
                    controller.clear().await;
                }
            }
        })
    }

    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    // ── View accessors ──────────────────────────────────────────────────────

    pub async fn entries(&self) -> Vec<DiaryEntry> {
        self.cursor.lock().await.entries.clone()
    }

    pub async fn draft(&self) -> Vec<String> {
        self.cursor.lock().await.draft.clone()
    }

    pub async fn selected_date(&self) -> String {
        self.cursor.lock().await.selected_date.clone()
    }

    pub async fn displayed_feedback(&self) -> String {
        self.cursor.lock().await.feedback.clone()
    }

    // ── Internals ───────────────────────────────────────────────────────────

    async fn reload(&self, cursor: &mut Cursor) -> Result<(), ControllerError> {
        let session = self.auth.require_session()?;
        cursor.entries = self.store.list_all(&session).await?;
        Ok(())
    }

    async fn save_draft(
        &self,
        cursor: &mut Cursor,
        draft: Vec<String>,
    ) -> Result<SubmitOutcome, ControllerError> {
        let session = self.auth.require_session()?;

        // Feedback first: the entry is only written once feedback is in
        // hand, so a gateway failure cannot leave a half-saved day.
        let feedback = self.gateway.feedback(&draft).await?;
        let entry = DiaryEntry::new(cursor.selected_date.clone(), draft, feedback.clone());
        let stored = self.store.upsert(&session, entry).await?;

        cursor.entries = self.store.list_all(&session).await?;
        cursor.draft = blank_draft();
        cursor.feedback = feedback;
        Ok(SubmitOutcome::Saved(stored))
    }

    async fn perform_delete(
        &self,
        cursor: &mut Cursor,
        date: &str,
    ) -> Result<DeleteOutcome, ControllerError> {
        let session = self.auth.require_session()?;
        let deleted = self.store.delete_by_date(&session, date).await?;

        cursor.entries = self.store.list_all(&session).await?;
        if date == cursor.selected_date {
            cursor.draft = blank_draft();
            cursor.feedback.clear();
        }

        Ok(match deleted {
            Some(id) => DeleteOutcome::Deleted(id),
            None => DeleteOutcome::NotFound,
        })
    }

    async fn clear(&self) {
        let mut cursor = self.cursor.lock().await;
        cursor.entries.clear();
        cursor.draft = blank_draft();
        cursor.feedback.clear();
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }
}

fn blank_draft() -> Vec<String> {
    vec![String::new(); SLOT_COUNT]
}

/// Trim, length-limit, and shape the draft into exactly [`SLOT_COUNT`]
/// positions, mirroring the edit form's constraints.
fn sanitize_draft(items: &[String]) -> Vec<String> {
    let mut draft = items
        .iter()
        .take(SLOT_COUNT)
        .map(|item| truncate_chars(item.trim(), MAX_ITEM_CHARS).to_string())
        .collect::<Vec<_>>();
    draft.resize(SLOT_COUNT, String::new());
    draft
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use haru_entry::{Normalizer, SlotPolicy};
    use haru_store::{LocalStore, Session};
    use tempfile::TempDir;

    use super::*;
    use crate::confirm::{AutoConfirm, DenyAll};

    // ── Test doubles ────────────────────────────────────────────────────────

    /// Scripted gateway: fixed reply, optional failure, call counters, and a
    /// capture of the moments passed to `analysis`.
    struct StubGateway {
        reply: String,
        fail: AtomicBool,
        feedback_calls: AtomicUsize,
        analysis_calls: AtomicUsize,
        analyzed: std::sync::Mutex<Vec<String>>,
    }

    impl StubGateway {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                fail: AtomicBool::new(false),
                feedback_calls: AtomicUsize::new(0),
                analysis_calls: AtomicUsize::new(0),
                analyzed: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn failing(reply: &str) -> Self {
            let stub = Self::replying(reply);
            stub.fail.store(true, Ordering::SeqCst);
            stub
        }

        fn result(&self) -> Result<String, GatewayError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(GatewayError::Status {
                    status: 500,
                    message: "upstream unavailable".to_string(),
                })
            } else {
                Ok(self.reply.clone())
            }
        }
    }

    #[async_trait]
    impl FeedbackGateway for StubGateway {
        async fn feedback(&self, _items: &[String]) -> Result<String, GatewayError> {
            self.feedback_calls.fetch_add(1, Ordering::SeqCst);
            self.result()
        }

        async fn analysis(&self, moments: &[String]) -> Result<String, GatewayError> {
            self.analysis_calls.fetch_add(1, Ordering::SeqCst);
            *self.analyzed.lock().unwrap() = moments.to_vec();
            self.result()
        }
    }

    struct Rig {
        controller: Arc<DiaryController>,
        store: Arc<LocalStore>,
        gateway: Arc<StubGateway>,
        session: Session,
        _dir: TempDir,
    }

    fn rig(gateway: StubGateway) -> Rig {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(
            dir.path(),
            Normalizer::new(SlotPolicy::PreserveSlots),
        ));
        let gateway = Arc::new(gateway);
        let session = Session::local();
        let controller = Arc::new(DiaryController::new(
            store.clone(),
            gateway.clone(),
            AuthState::signed_in(session.clone()),
        ));
        Rig {
            controller,
            store,
            gateway,
            session,
            _dir: dir,
        }
    }

    fn draft(items: [&str; 3]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    // ── Submit ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn submit_saves_entry_with_feedback_and_lists_it_first() {
        let rig = rig(StubGateway::replying("Great job! 😊"));
        rig.store
            .upsert(
                &rig.session,
                DiaryEntry::new("2024-01-01", draft(["a", "b", ""]), ""),
            )
            .await
            .unwrap();

        rig.controller.select_date("2024-01-05").await.unwrap();
        let outcome = rig
            .controller
            .submit(&draft(["x", "", ""]), &AutoConfirm)
            .await
            .unwrap();

        let SubmitOutcome::Saved(saved) = outcome else {
            panic!("expected a save");
        };
        assert_eq!(saved.date, "2024-01-05");
        assert_eq!(saved.items, vec!["x", "", ""]);
        assert_eq!(saved.ai_feedback, "Great job! 😊");

        let entries = rig.controller.entries().await;
        assert_eq!(entries[0].date, "2024-01-05");
        assert_eq!(entries[1].date, "2024-01-01");
        // Draft resets after a save; displayed feedback shows the new text.
        assert_eq!(rig.controller.draft().await, vec!["", "", ""]);
        assert_eq!(rig.controller.displayed_feedback().await, "Great job! 😊");
    }

    #[tokio::test]
    async fn all_blank_draft_is_rejected_before_the_gateway_is_called() {
        let rig = rig(StubGateway::replying("unused"));
        rig.controller.select_date("2024-01-05").await.unwrap();

        let result = rig
            .controller
            .submit(&draft(["  ", "", "\t"]), &AutoConfirm)
            .await;
        assert!(matches!(result, Err(ControllerError::EmptyDraft)));
        assert_eq!(rig.gateway.feedback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn declined_overwrite_leaves_the_stored_entry_unchanged() {
        let rig = rig(StubGateway::replying("new feedback"));
        rig.store
            .upsert(
                &rig.session,
                DiaryEntry::new("2024-01-05", draft(["original", "", ""]), "old"),
            )
            .await
            .unwrap();

        rig.controller.select_date("2024-01-05").await.unwrap();
        let outcome = rig
            .controller
            .submit(&draft(["replacement", "", ""]), &DenyAll)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Declined);
        assert_eq!(rig.gateway.feedback_calls.load(Ordering::SeqCst), 0);

        let kept = rig
            .store
            .find_by_date(&rig.session, "2024-01-05")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.items[0], "original");
        assert_eq!(kept.ai_feedback, "old");
    }

    #[tokio::test]
    async fn overwrite_gate_consults_the_store_even_before_any_load() {
        let rig = rig(StubGateway::replying("new feedback"));
        // Entry exists in the store for the controller's default selection,
        // but the controller's in-memory list was never populated.
        let date = rig.controller.selected_date().await;
        rig.store
            .upsert(
                &rig.session,
                DiaryEntry::new(date.clone(), draft(["original", "", ""]), "old"),
            )
            .await
            .unwrap();

        let outcome = rig
            .controller
            .submit(&draft(["replacement", "", ""]), &DenyAll)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Declined);
        assert_eq!(rig.gateway.feedback_calls.load(Ordering::SeqCst), 0);

        let kept = rig
            .store
            .find_by_date(&rig.session, &date)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.items[0], "original");
        assert_eq!(kept.ai_feedback, "old");
    }

    #[tokio::test]
    async fn confirmed_overwrite_replaces_in_place_without_duplicating() {
        let rig = rig(StubGateway::replying("fresh"));
        rig.store
            .upsert(
                &rig.session,
                DiaryEntry::new("2024-01-05", draft(["old", "", ""]), ""),
            )
            .await
            .unwrap();

        rig.controller.select_date("2024-01-05").await.unwrap();
        rig.controller
            .submit(&draft(["new", "", ""]), &AutoConfirm)
            .await
            .unwrap();

        let entries = rig.store.list_all(&rig.session).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].items[0], "new");
    }

    #[tokio::test]
    async fn gateway_failure_writes_nothing_for_a_new_date() {
        let rig = rig(StubGateway::failing("unused"));
        rig.controller.select_date("2024-01-05").await.unwrap();

        let result = rig
            .controller
            .submit(&draft(["x", "", ""]), &AutoConfirm)
            .await;
        assert!(matches!(result, Err(ControllerError::Gateway(_))));
        assert!(rig
            .store
            .find_by_date(&rig.session, "2024-01-05")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn gateway_failure_preserves_the_prior_entry_on_overwrite() {
        let rig = rig(StubGateway::failing("unused"));
        rig.store
            .upsert(
                &rig.session,
                DiaryEntry::new("2024-01-05", draft(["keep me", "", ""]), "kept"),
            )
            .await
            .unwrap();

        rig.controller.select_date("2024-01-05").await.unwrap();
        let result = rig
            .controller
            .submit(&draft(["lost", "", ""]), &AutoConfirm)
            .await;
        assert!(result.is_err());

        let kept = rig
            .store
            .find_by_date(&rig.session, "2024-01-05")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.items[0], "keep me");
        assert_eq!(kept.ai_feedback, "kept");
    }

    #[tokio::test]
    async fn overlong_draft_items_are_truncated_to_the_slot_limit() {
        let rig = rig(StubGateway::replying("ok"));
        rig.controller.select_date("2024-01-05").await.unwrap();

        let long = "m".repeat(45);
        let SubmitOutcome::Saved(saved) = rig
            .controller
            .submit(&vec![long, String::new(), String::new()], &AutoConfirm)
            .await
            .unwrap()
        else {
            panic!("expected a save");
        };
        assert_eq!(saved.items[0].chars().count(), MAX_ITEM_CHARS);
    }

    // ── Analysis ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn analysis_on_an_empty_diary_is_rejected_without_a_gateway_call() {
        let rig = rig(StubGateway::replying("unused"));
        let result = rig.controller.request_analysis().await;
        assert!(matches!(result, Err(ControllerError::NothingToAnalyze)));
        assert_eq!(rig.gateway.analysis_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn analysis_flattens_non_empty_moments_in_list_order_and_persists() {
        let rig = rig(StubGateway::replying("you like small joys"));
        rig.store
            .upsert(
                &rig.session,
                DiaryEntry::new("2024-01-01", draft(["a", "b", ""]), ""),
            )
            .await
            .unwrap();
        rig.store
            .upsert(
                &rig.session,
                DiaryEntry::new("2024-01-03", draft(["c", "", ""]), ""),
            )
            .await
            .unwrap();

        let analysis = rig.controller.request_analysis().await.unwrap();
        assert_eq!(analysis, "you like small joys");

        // Newest-first list order: 2024-01-03's moments come first.
        let analyzed = rig.gateway.analyzed.lock().unwrap().clone();
        assert_eq!(analyzed, vec!["c", "a", "b"]);

        let saved = rig.controller.saved_analysis().await.unwrap();
        assert_eq!(saved.as_deref(), Some("you like small joys"));
    }

    #[tokio::test]
    async fn failed_analysis_leaves_the_previous_result_untouched() {
        let rig = rig(StubGateway::failing("unused"));
        rig.store
            .upsert(
                &rig.session,
                DiaryEntry::new("2024-01-01", draft(["a", "", ""]), ""),
            )
            .await
            .unwrap();
        rig.store
            .save_analysis(&rig.session, "previous")
            .await
            .unwrap();

        assert!(rig.controller.request_analysis().await.is_err());
        assert_eq!(
            rig.controller.saved_analysis().await.unwrap().as_deref(),
            Some("previous")
        );
    }

    // ── Delete ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn deleting_the_selected_date_clears_draft_and_feedback() {
        let rig = rig(StubGateway::replying("nice"));
        rig.store
            .upsert(
                &rig.session,
                DiaryEntry::new("2024-01-05", draft(["x", "", ""]), "nice"),
            )
            .await
            .unwrap();

        rig.controller.select_date("2024-01-05").await.unwrap();
        assert_eq!(rig.controller.draft().await[0], "x");

        let outcome = rig
            .controller
            .delete_entry("2024-01-05", &AutoConfirm)
            .await
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted("2024-01-05".to_string()));
        assert_eq!(rig.controller.draft().await, vec!["", "", ""]);
        assert_eq!(rig.controller.displayed_feedback().await, "");
        assert!(rig.controller.entries().await.is_empty());
    }

    #[tokio::test]
    async fn deleting_an_absent_date_is_a_no_op_not_an_error() {
        let rig = rig(StubGateway::replying("unused"));
        let outcome = rig
            .controller
            .delete_entry("2024-01-05", &AutoConfirm)
            .await
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::NotFound);
    }

    #[tokio::test]
    async fn declined_delete_changes_nothing() {
        let rig = rig(StubGateway::replying("unused"));
        rig.store
            .upsert(
                &rig.session,
                DiaryEntry::new("2024-01-05", draft(["x", "", ""]), ""),
            )
            .await
            .unwrap();

        let outcome = rig
            .controller
            .delete_entry("2024-01-05", &DenyAll)
            .await
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::Declined);
        assert!(rig
            .store
            .find_by_date(&rig.session, "2024-01-05")
            .await
            .unwrap()
            .is_some());
    }

    // ── Selection ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn selecting_a_date_populates_draft_and_feedback_without_saving() {
        let rig = rig(StubGateway::replying("unused"));
        rig.store
            .upsert(
                &rig.session,
                DiaryEntry::new("2024-01-05", draft(["x", "y", ""]), "warm words"),
            )
            .await
            .unwrap();

        rig.controller.select_date("2024-01-05").await.unwrap();
        assert_eq!(rig.controller.draft().await, vec!["x", "y", ""]);
        assert_eq!(rig.controller.displayed_feedback().await, "warm words");

        rig.controller.select_date("2024-01-06").await.unwrap();
        assert_eq!(rig.controller.draft().await, vec!["", "", ""]);
        assert_eq!(rig.controller.displayed_feedback().await, "");
        // Switching dates never wrote anything.
        assert_eq!(rig.store.list_all(&rig.session).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn selecting_a_malformed_date_is_rejected() {
        let rig = rig(StubGateway::replying("unused"));
        assert!(matches!(
            rig.controller.select_date("2024-02-30").await,
            Err(ControllerError::InvalidDate(_))
        ));
    }

    // ── Snapshots and auth ──────────────────────────────────────────────────

    #[tokio::test]
    async fn snapshots_replace_the_list_wholesale_but_keep_the_draft() {
        let rig = rig(StubGateway::replying("unused"));
        rig.controller.select_date("2024-01-05").await.unwrap();

        // Simulate an in-progress edit, then a push snapshot arriving.
        let snapshot = vec![
            DiaryEntry::new("2024-01-01", draft(["a", "", ""]), ""),
            DiaryEntry::new("2024-01-05", draft(["remote", "", ""]), "from remote"),
        ];
        rig.controller.apply_snapshot(snapshot).await;

        let entries = rig.controller.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].date, "2024-01-05", "snapshot is re-sorted");
        assert_eq!(rig.controller.displayed_feedback().await, "from remote");
        // The draft is local edit state and is not overwritten.
        assert_eq!(rig.controller.draft().await, vec!["", "", ""]);
    }

    #[tokio::test]
    async fn snapshot_watcher_feeds_store_updates_into_the_view() {
        let rig = rig(StubGateway::replying("unused"));
        let rx = rig.store.subscribe(&rig.session).await.unwrap();
        let handle = rig.controller.spawn_snapshot_watcher(rx);

        rig.store
            .upsert(
                &rig.session,
                DiaryEntry::new("2024-01-05", draft(["pushed", "", ""]), ""),
            )
            .await
            .unwrap();

        // Give the watcher task a chance to run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let entries = rig.controller.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].items[0], "pushed");
        handle.abort();
    }

    #[tokio::test]
    async fn operations_require_a_session() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(
            dir.path(),
            Normalizer::new(SlotPolicy::PreserveSlots),
        ));
        let controller = DiaryController::new(
            store,
            Arc::new(StubGateway::replying("unused")),
            AuthState::new(),
        );

        assert!(matches!(
            controller.select_date("2024-01-05").await,
            Err(ControllerError::Store(StoreError::Unauthenticated))
        ));
        assert!(matches!(
            controller.submit(&draft(["x", "", ""]), &AutoConfirm).await,
            Err(ControllerError::Store(StoreError::Unauthenticated))
        ));
    }

    #[tokio::test]
    async fn sign_out_clears_the_in_memory_view() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalStore::new(
            dir.path(),
            Normalizer::new(SlotPolicy::PreserveSlots),
        ));
        let auth = AuthState::signed_in(Session::local());
        let controller = Arc::new(DiaryController::new(
            store.clone(),
            Arc::new(StubGateway::replying("unused")),
            auth.clone(),
        ));

        store
            .upsert(
                &Session::local(),
                DiaryEntry::new("2024-01-05", draft(["x", "", ""]), ""),
            )
            .await
            .unwrap();
        controller.refresh().await.unwrap();
        assert_eq!(controller.entries().await.len(), 1);

        let handle = controller.spawn_auth_watcher();
        auth.sign_out();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(controller.entries().await.is_empty());
        handle.abort();
    }

    // ── Phase broadcasting ──────────────────────────────────────────────────

    #[tokio::test]
    async fn phase_returns_to_idle_even_after_a_failure() {
        let rig = rig(StubGateway::failing("unused"));
        let phase = rig.controller.watch_phase();

        rig.controller.select_date("2024-01-05").await.unwrap();
        let _ = rig
            .controller
            .submit(&draft(["x", "", ""]), &AutoConfirm)
            .await;
        assert_eq!(*phase.borrow(), Phase::Idle);
    }
}
