//! Mounted consoles and the single foreground console

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::autosave::{AutosaveCoordinator, DraftStorage};
use crate::chat::{
    AiBackend, ChatSession, ChatSessionHandle, ChatSettings, CredentialContext, SessionDeps,
    SessionUpdate, StreamTransport,
};
use crate::data::DatabaseError;
use crate::editor::EditorSurface;
use crate::session::{ConsoleSession, SessionId};

/// Process-wide services shared by every console.
#[derive(Clone)]
pub struct SharedServices {
    pub transport: Arc<dyn StreamTransport>,
    pub backend: Arc<dyn AiBackend>,
    pub credentials: Arc<dyn CredentialContext>,
}

struct MountedConsole {
    handle: ChatSessionHandle,
    editor: Arc<dyn EditorSurface>,
}

/// Owns the chat sessions of all mounted consoles and keeps autosave in step
/// with which console is in the foreground.
pub struct ConsoleWorkspace {
    services: SharedServices,
    settings: ChatSettings,
    autosave: AutosaveCoordinator,
    consoles: HashMap<SessionId, MountedConsole>,
    foreground: Option<SessionId>,
}

impl ConsoleWorkspace {
    pub fn new(
        services: SharedServices,
        storage: Arc<dyn DraftStorage>,
        settings: ChatSettings,
        autosave_interval: Duration,
    ) -> Self {
        Self {
            services,
            settings,
            autosave: AutosaveCoordinator::new(storage, autosave_interval),
            consoles: HashMap::new(),
            foreground: None,
        }
    }

    /// Start a chat session for `console`. The console stays in the
    /// background until [`activate`](Self::activate) is called.
    pub fn mount(
        &mut self,
        console: ConsoleSession,
        editor: Arc<dyn EditorSurface>,
    ) -> (ChatSessionHandle, mpsc::UnboundedReceiver<SessionUpdate>) {
        let session_id = console.id().clone();
        if let Some(previous) = self.consoles.remove(&session_id) {
            tracing::warn!(%session_id, "Console mounted twice, replacing previous session");
            if self.foreground.as_ref() == Some(&session_id) {
                self.foreground = None;
            }
            self.autosave.deactivate(&session_id);
            previous.handle.shutdown();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let deps = SessionDeps {
            transport: self.services.transport.clone(),
            backend: self.services.backend.clone(),
            credentials: self.services.credentials.clone(),
            editor: editor.clone(),
        };
        let handle = ChatSession::spawn(console, deps, self.settings, tx);

        self.consoles.insert(
            session_id.clone(),
            MountedConsole {
                handle: handle.clone(),
                editor,
            },
        );
        tracing::debug!(%session_id, "Console mounted");
        (handle, rx)
    }

    /// Bring a mounted console to the foreground. The previous foreground
    /// console is flushed first.
    pub fn activate(&mut self, session_id: &SessionId) -> bool {
        let Some(console) = self.consoles.get(session_id) else {
            return false;
        };
        if self.foreground.as_ref() == Some(session_id) {
            return true;
        }
        let editor = console.editor.clone();

        if let Some(previous) = self.foreground.take() {
            self.autosave.deactivate(&previous);
        }
        self.autosave.activate(session_id, editor);
        self.foreground = Some(session_id.clone());
        true
    }

    /// Send the foreground console to the background.
    pub fn deactivate_foreground(&mut self) {
        if let Some(previous) = self.foreground.take() {
            self.autosave.deactivate(&previous);
        }
    }

    /// Tear down a console: final draft flush, then its chat session stops.
    pub fn unmount(&mut self, session_id: &SessionId) -> bool {
        let Some(console) = self.consoles.remove(session_id) else {
            return false;
        };
        if self.foreground.as_ref() == Some(session_id) {
            self.foreground = None;
        }
        self.autosave.deactivate(session_id);
        console.handle.shutdown();
        tracing::debug!(%session_id, "Console unmounted");
        true
    }

    /// The console's content was saved elsewhere; its draft is obsolete.
    pub fn mark_saved(&mut self, session_id: &SessionId) -> Result<(), DatabaseError> {
        self.autosave.discard(session_id)
    }

    pub fn foreground(&self) -> Option<&SessionId> {
        self.foreground.as_ref()
    }

    pub fn handle(&self, session_id: &SessionId) -> Option<&ChatSessionHandle> {
        self.consoles.get(session_id).map(|console| &console.handle)
    }

    pub fn mounted(&self) -> usize {
        self.consoles.len()
    }

    pub fn autosave(&self) -> &AutosaveCoordinator {
        &self.autosave
    }

    /// Unmount every console.
    pub fn shutdown(&mut self) {
        let ids: Vec<SessionId> = self.consoles.keys().cloned().collect();
        for id in ids {
            self.unmount(&id);
        }
    }
}

impl Drop for ConsoleWorkspace {
    fn drop(&mut self) {
        self.shutdown();
    }
}
