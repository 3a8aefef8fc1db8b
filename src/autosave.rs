//! Editor draft autosave
//!
//! While a console is in the foreground its editor content is persisted on a
//! fixed interval. Leaving the foreground stops the timer and persists once
//! more; coming back restores the stored draft into the editor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::data::{DatabaseError, DraftStore};
use crate::editor::{EditorSurface, SetValueMode};
use crate::session::SessionId;
use crate::task::{ScheduledTask, TaskRegistry};

pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_millis(5000);

/// Durable storage for drafts, keyed by session id.
pub trait DraftStorage: Send + Sync {
    fn save(&self, session_id: &SessionId, content: &str) -> Result<(), DatabaseError>;

    fn load(&self, session_id: &SessionId) -> Result<Option<String>, DatabaseError>;

    fn delete(&self, session_id: &SessionId) -> Result<(), DatabaseError>;
}

impl DraftStorage for DraftStore {
    fn save(&self, session_id: &SessionId, content: &str) -> Result<(), DatabaseError> {
        Ok(DraftStore::save(self, session_id.as_str(), content)?)
    }

    fn load(&self, session_id: &SessionId) -> Result<Option<String>, DatabaseError> {
        Ok(DraftStore::load(self, session_id.as_str())?)
    }

    fn delete(&self, session_id: &SessionId) -> Result<(), DatabaseError> {
        Ok(DraftStore::delete(self, session_id.as_str())?)
    }
}

/// In-memory draft storage that counts saves
#[derive(Debug, Default)]
pub struct MemoryDraftStorage {
    drafts: Mutex<HashMap<SessionId, String>>,
    saves: Mutex<usize>,
}

impl MemoryDraftStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_draft(session_id: &SessionId, content: impl Into<String>) -> Self {
        let storage = Self::default();
        storage
            .drafts
            .lock()
            .insert(session_id.clone(), content.into());
        storage
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }

    pub fn get(&self, session_id: &SessionId) -> Option<String> {
        self.drafts.lock().get(session_id).cloned()
    }
}

impl DraftStorage for MemoryDraftStorage {
    fn save(&self, session_id: &SessionId, content: &str) -> Result<(), DatabaseError> {
        self.drafts
            .lock()
            .insert(session_id.clone(), content.to_string());
        *self.saves.lock() += 1;
        Ok(())
    }

    fn load(&self, session_id: &SessionId) -> Result<Option<String>, DatabaseError> {
        Ok(self.get(session_id))
    }

    fn delete(&self, session_id: &SessionId) -> Result<(), DatabaseError> {
        self.drafts.lock().remove(session_id);
        Ok(())
    }
}

/// Draft being autosaved for one foreground session
struct ActiveDraft {
    editor: Arc<dyn EditorSurface>,
    last_persisted: Arc<Mutex<Option<String>>>,
}

pub struct AutosaveCoordinator {
    storage: Arc<dyn DraftStorage>,
    interval: Duration,
    timers: TaskRegistry<SessionId>,
    active: HashMap<SessionId, ActiveDraft>,
}

impl AutosaveCoordinator {
    pub fn new(storage: Arc<dyn DraftStorage>, interval: Duration) -> Self {
        Self {
            storage,
            interval,
            timers: TaskRegistry::new(),
            active: HashMap::new(),
        }
    }

    /// Session gained the foreground: restore its draft and start the timer.
    /// Returns false if it was already active.
    pub fn activate(&mut self, session_id: &SessionId, editor: Arc<dyn EditorSurface>) -> bool {
        if self.active.contains_key(session_id) {
            return false;
        }

        let last_persisted = Arc::new(Mutex::new(None));
        match self.storage.load(session_id) {
            Ok(Some(draft)) => {
                tracing::debug!(%session_id, "Restoring draft");
                editor.set_value(&draft, SetValueMode::Reset);
                *last_persisted.lock() = Some(draft);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%session_id, error = %err, "Failed to load draft");
            }
        }

        let timer = {
            let storage = self.storage.clone();
            let editor = editor.clone();
            let last_persisted = last_persisted.clone();
            let session_id = session_id.clone();
            let interval = self.interval;
            ScheduledTask::spawn("autosave", async move {
                let mut ticker = interval_at(Instant::now() + interval, interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    persist(storage.as_ref(), &session_id, editor.as_ref(), &last_persisted);
                }
            })
        };

        self.timers.insert(session_id.clone(), timer);
        self.active.insert(
            session_id.clone(),
            ActiveDraft {
                editor,
                last_persisted,
            },
        );
        true
    }

    /// Session lost the foreground: stop the timer and persist once.
    /// Returns false if it was not active.
    pub fn deactivate(&mut self, session_id: &SessionId) -> bool {
        let Some(draft) = self.active.remove(session_id) else {
            return false;
        };
        self.timers.cancel(session_id);
        persist(
            self.storage.as_ref(),
            session_id,
            draft.editor.as_ref(),
            &draft.last_persisted,
        );
        true
    }

    /// Drop the stored draft, e.g. after the console was saved elsewhere.
    pub fn discard(&mut self, session_id: &SessionId) -> Result<(), DatabaseError> {
        self.storage.delete(session_id)?;
        if let Some(draft) = self.active.get(session_id) {
            *draft.last_persisted.lock() = None;
        }
        tracing::debug!(%session_id, "Draft discarded");
        Ok(())
    }

    pub fn is_active(&self, session_id: &SessionId) -> bool {
        self.active.contains_key(session_id)
    }

    /// Number of running autosave timers
    pub fn live_timers(&self) -> usize {
        self.timers.live_count()
    }

    /// Content written by the most recent persist of an active session
    pub fn last_persisted(&self, session_id: &SessionId) -> Option<String> {
        self.active
            .get(session_id)
            .and_then(|draft| draft.last_persisted.lock().clone())
    }

    /// Deactivate every session.
    pub fn shutdown(&mut self) {
        let ids: Vec<SessionId> = self.active.keys().cloned().collect();
        for id in ids {
            self.deactivate(&id);
        }
        self.timers.cancel_all();
    }
}

impl Drop for AutosaveCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn persist(
    storage: &dyn DraftStorage,
    session_id: &SessionId,
    editor: &dyn EditorSurface,
    last_persisted: &Mutex<Option<String>>,
) {
    let content = editor.get_all_content();
    match storage.save(session_id, &content) {
        Ok(()) => {
            tracing::trace!(%session_id, bytes = content.len(), "Draft persisted");
            *last_persisted.lock() = Some(content);
        }
        Err(err) => {
            tracing::warn!(%session_id, error = %err, "Failed to persist draft");
        }
    }
}
