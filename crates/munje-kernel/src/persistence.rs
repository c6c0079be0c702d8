//! Debounced autosave.
//!
//! One [`AutosaveMachine`] per open page. Mutations schedule a write after a
//! quiet period; more mutations inside the window push the deadline out
//! instead of stacking writes.
//!
//! ```text
//!            Mutated                 deadline / BeginSave
//!   Idle ─────────────▶ Pending ──────────────────────────▶ Saving
//!    ▲                   │  ▲ Mutated (reset)                 │  │
//!    │      Cancel       │  └─────────────────────────────────┘  │ Mutated: record deferred deadline
//!    ├───────────────────┘        SaveSucceeded/SaveFailed        │
//!    │                            with deferred deadline          │
//!    └────────────────────────────────────────────────────────────┘
//!                      SaveSucceeded/SaveFailed, nothing deferred
//! ```
//!
//! While a page is loading the machine ignores mutations entirely, so the
//! initial population of the group list never schedules a write.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use munje_types::{DocumentId, ProblemGroup};

use crate::services::{GroupStore, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    Pending { deadline: Instant },
    Saving { deferred: Option<Instant> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveEvent {
    Mutated,
    BeginSave,
    SaveSucceeded,
    SaveFailed,
    Cancel,
}

/// Autosave transition table plus the load guard.
#[derive(Debug, Clone)]
pub struct AutosaveMachine {
    state: SaveState,
    debounce: Duration,
    loading: bool,
}

impl AutosaveMachine {
    pub fn new(debounce: Duration) -> Self {
        Self {
            state: SaveState::Idle,
            debounce,
            loading: false,
        }
    }

    pub fn state(&self) -> SaveState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Apply `event` at `now`. Returns false when the event was ignored.
    pub fn apply(&mut self, event: SaveEvent, now: Instant) -> bool {
        use SaveEvent::*;
        use SaveState::*;

        if self.loading && event == Mutated {
            debug!("mutation during load; autosave suppressed");
            return false;
        }

        let next = match (self.state, event) {
            (Idle | Pending { .. }, Mutated) => Pending {
                deadline: now + self.debounce,
            },
            (Saving { .. }, Mutated) => Saving {
                deferred: Some(now + self.debounce),
            },
            (Idle | Pending { .. }, BeginSave) => Saving { deferred: None },
            (Saving { deferred }, SaveSucceeded | SaveFailed) => match deferred {
                Some(deadline) => Pending { deadline },
                None => Idle,
            },
            (Idle | Pending { .. }, Cancel) => Idle,
            (state, event) => {
                warn!(?state, ?event, "ignoring invalid autosave transition");
                return false;
            }
        };

        debug!(from = ?self.state, to = ?next, ?event, "autosave transition");
        self.state = next;
        true
    }

    /// Raise the load guard and drop any pending deadline.
    pub fn begin_load(&mut self) {
        self.loading = true;
        if let SaveState::Pending { .. } = self.state {
            self.state = SaveState::Idle;
        }
    }

    pub fn finish_load(&mut self) {
        self.loading = false;
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            SaveState::Pending { deadline } => Some(deadline),
            _ => None,
        }
    }
}

/// Writes one page's group list through the [`GroupStore`].
pub struct PersistenceController {
    store: Arc<dyn GroupStore>,
    machine: AutosaveMachine,
    dirty: bool,
    save_count: u64,
    last_saved_at: Option<u64>,
    last_error: Option<ServiceError>,
}

impl PersistenceController {
    pub fn new(store: Arc<dyn GroupStore>, debounce: Duration) -> Self {
        Self {
            store,
            machine: AutosaveMachine::new(debounce),
            dirty: false,
            save_count: 0,
            last_saved_at: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> SaveState {
        self.machine.state()
    }

    /// Record a local mutation and (re)start the quiet period.
    pub fn schedule(&mut self) {
        if self.machine.apply(SaveEvent::Mutated, Instant::now()) {
            self.dirty = true;
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.machine.deadline()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|d| d <= now)
    }

    pub fn cancel_pending(&mut self) {
        if self.deadline().is_some() {
            self.machine.apply(SaveEvent::Cancel, Instant::now());
        }
    }

    pub fn begin_load(&mut self) {
        self.machine.begin_load();
        self.dirty = false;
    }

    pub fn finish_load(&mut self) {
        self.machine.finish_load();
    }

    pub fn is_loading(&self) -> bool {
        self.machine.is_loading()
    }

    /// Local edits not yet written.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn save_count(&self) -> u64 {
        self.save_count
    }

    /// Unix millis of the last successful write.
    pub fn last_saved_at(&self) -> Option<u64> {
        self.last_saved_at
    }

    /// Most recent background failure, cleared by the next successful write.
    pub fn last_error(&self) -> Option<&ServiceError> {
        self.last_error.as_ref()
    }

    async fn write(
        &mut self,
        doc: &DocumentId,
        page: u32,
        groups: &[ProblemGroup],
    ) -> Result<(), ServiceError> {
        self.machine.apply(SaveEvent::BeginSave, Instant::now());
        match self.store.save_groups(doc, page, groups).await {
            Ok(()) => {
                let deferred = matches!(self.machine.state(), SaveState::Saving { deferred: Some(_) });
                self.machine.apply(SaveEvent::SaveSucceeded, Instant::now());
                self.dirty = deferred;
                self.save_count += 1;
                self.last_saved_at = Some(munje_types::now_millis());
                self.last_error = None;
                info!(%doc, page, groups = groups.len(), "saved group list");
                Ok(())
            }
            Err(e) => {
                self.machine.apply(SaveEvent::SaveFailed, Instant::now());
                self.dirty = true;
                Err(e)
            }
        }
    }

    /// Cancel any pending deadline and write now.
    #[tracing::instrument(skip_all, fields(doc = %doc, page = page))]
    pub async fn save_immediately(
        &mut self,
        doc: &DocumentId,
        page: u32,
        groups: &[ProblemGroup],
    ) -> Result<(), ServiceError> {
        self.cancel_pending();
        self.write(doc, page, groups).await
    }

    /// Write if the quiet period has elapsed. Failures are logged and kept
    /// in [`last_error`](Self::last_error); local edits stay dirty.
    pub async fn run_autosave(
        &mut self,
        doc: &DocumentId,
        page: u32,
        groups: &[ProblemGroup],
    ) -> bool {
        if !self.is_due(Instant::now()) {
            return false;
        }
        match self.write(doc, page, groups).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%doc, page, error = %e, "autosave failed; edits kept for next save");
                self.last_error = Some(e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGroupStore;

    const DEBOUNCE: Duration = Duration::from_secs(2);

    #[tokio::test(start_paused = true)]
    async fn test_transition_table() {
        let mut m = AutosaveMachine::new(DEBOUNCE);
        let t0 = Instant::now();

        assert!(m.apply(SaveEvent::Mutated, t0));
        assert_eq!(m.deadline(), Some(t0 + DEBOUNCE));

        // Reset, not stacked.
        let t1 = t0 + Duration::from_millis(500);
        assert!(m.apply(SaveEvent::Mutated, t1));
        assert_eq!(m.deadline(), Some(t1 + DEBOUNCE));

        assert!(m.apply(SaveEvent::BeginSave, t1));
        assert!(m.apply(SaveEvent::Mutated, t1));
        assert_eq!(m.state(), SaveState::Saving { deferred: Some(t1 + DEBOUNCE) });

        assert!(m.apply(SaveEvent::SaveSucceeded, t1));
        assert_eq!(m.state(), SaveState::Pending { deadline: t1 + DEBOUNCE });

        assert!(m.apply(SaveEvent::Cancel, t1));
        assert_eq!(m.state(), SaveState::Idle);

        // Completing a save that never started is ignored.
        assert!(!m.apply(SaveEvent::SaveSucceeded, t1));
        assert_eq!(m.state(), SaveState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_guard_suppresses_scheduling() {
        let mut m = AutosaveMachine::new(DEBOUNCE);
        m.apply(SaveEvent::Mutated, Instant::now());
        m.begin_load();
        assert_eq!(m.state(), SaveState::Idle);
        assert!(!m.apply(SaveEvent::Mutated, Instant::now()));
        m.finish_load();
        assert!(m.apply(SaveEvent::Mutated, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalesced_mutations_write_once() {
        let store = Arc::new(MemoryGroupStore::new());
        let mut ctl = PersistenceController::new(store.clone(), DEBOUNCE);
        let doc = DocumentId::from("doc");

        for _ in 0..5 {
            ctl.schedule();
            tokio::time::advance(Duration::from_millis(400)).await;
            assert!(!ctl.run_autosave(&doc, 0, &[]).await);
        }
        tokio::time::advance(DEBOUNCE).await;
        assert!(ctl.run_autosave(&doc, 0, &[]).await);
        assert!(!ctl.run_autosave(&doc, 0, &[]).await);

        assert_eq!(store.save_count(), 1);
        assert_eq!(ctl.save_count(), 1);
        assert!(!ctl.is_dirty());
        assert!(ctl.last_saved_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_failure_keeps_dirty() {
        let store = Arc::new(MemoryGroupStore::new());
        store.fail_next_saves(1);
        let mut ctl = PersistenceController::new(store.clone(), DEBOUNCE);
        let doc = DocumentId::from("doc");

        ctl.schedule();
        tokio::time::advance(DEBOUNCE).await;
        assert!(!ctl.run_autosave(&doc, 0, &[]).await);
        assert!(ctl.is_dirty());
        assert!(ctl.last_error().is_some());
        assert_eq!(ctl.state(), SaveState::Idle);

        ctl.save_immediately(&doc, 0, &[]).await.unwrap();
        assert!(!ctl.is_dirty());
        assert!(ctl.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_save_cancels_pending() {
        let store = Arc::new(MemoryGroupStore::new());
        let mut ctl = PersistenceController::new(store.clone(), DEBOUNCE);
        let doc = DocumentId::from("doc");

        ctl.schedule();
        ctl.save_immediately(&doc, 0, &[]).await.unwrap();
        assert_eq!(ctl.deadline(), None);
        tokio::time::advance(DEBOUNCE).await;
        assert!(!ctl.run_autosave(&doc, 0, &[]).await);
        assert_eq!(store.save_count(), 1);
    }
}
