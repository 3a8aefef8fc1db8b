//! Chat session actor
//!
//! One [`ChatSession`] runs per mounted console. It owns the console's
//! prompt context, its single active stream and its recovery flow, and is
//! driven by a `select!` loop over UI commands, stream events and login poll
//! outcomes. The UI talks to it through a cloneable [`ChatSessionHandle`] and
//! observes it through [`SessionUpdate`]s.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::chat::backend::AiBackend;
use crate::chat::channel::{ChannelEvent, ChannelRequest, EventChannel, StreamTransport};
use crate::chat::credentials::{Credential, CredentialContext};
use crate::chat::error::ChatError;
use crate::chat::events::{ChatState, DisplayTarget, Notice, SessionUpdate};
use crate::chat::frame::{classify, FrameKind, StreamFrame};
use crate::chat::prompt::{PromptRequest, PromptType};
use crate::chat::recovery::{
    poll_login_status, AuthPollState, ChatSettings, PollOutcome, PollStatus, QrPayload, QrPurpose,
};
use crate::editor::{EditorSurface, SetValueMode};
use crate::session::{ConsoleSession, ExecutionContext, SessionId, TableSelection};
use crate::task::{ScheduledTask, TaskSlot};

/// Appended after every completed response.
pub const RESPONSE_SEPARATOR: &str = "\n\n\n";

/// Collaborators a session talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn StreamTransport>,
    pub backend: Arc<dyn AiBackend>,
    pub credentials: Arc<dyn CredentialContext>,
    pub editor: Arc<dyn EditorSurface>,
}

/// Point-in-time view of a session, for status displays and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ChatState,
    /// 0 or 1
    pub open_channels: usize,
    pub loading: Option<DisplayTarget>,
    pub qr: Option<QrPayload>,
    /// Latest login poll, kept after it finishes
    pub poll: Option<AuthPollState>,
    pub panel: String,
    pub known_tables: Vec<String>,
    pub selected_tables: Vec<String>,
}

#[derive(Debug)]
enum SessionCommand {
    Submit {
        prompt_type: PromptType,
        text: String,
    },
    SubmitSelection {
        prompt_type: PromptType,
    },
    SetKnownTables(Vec<String>),
    SelectTables(Vec<String>),
    SetContext(ExecutionContext),
    ShowInvite,
    DismissQr,
    Cancel,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

/// Handle to a running chat session
#[derive(Clone)]
pub struct ChatSessionHandle {
    session_id: SessionId,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl ChatSessionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn send(&self, cmd: SessionCommand) -> Result<(), ChatError> {
        self.cmd_tx.send(cmd).map_err(|_| ChatError::SessionClosed)
    }

    /// Submit a prompt. Whitespace-only text is ignored.
    pub fn submit(&self, prompt_type: PromptType, text: impl Into<String>) -> Result<(), ChatError> {
        self.send(SessionCommand::Submit {
            prompt_type,
            text: text.into(),
        })
    }

    /// Submit the editor's current selection, or its whole content when
    /// nothing is selected.
    pub fn submit_selection(&self, prompt_type: PromptType) -> Result<(), ChatError> {
        self.send(SessionCommand::SubmitSelection { prompt_type })
    }

    pub fn set_known_tables(&self, tables: Vec<String>) -> Result<(), ChatError> {
        self.send(SessionCommand::SetKnownTables(tables))
    }

    pub fn select_tables(&self, tables: Vec<String>) -> Result<(), ChatError> {
        self.send(SessionCommand::SelectTables(tables))
    }

    pub fn set_context(&self, context: ExecutionContext) -> Result<(), ChatError> {
        self.send(SessionCommand::SetContext(context))
    }

    /// Show the invite QR code (remaining uses).
    pub fn show_invite(&self) -> Result<(), ChatError> {
        self.send(SessionCommand::ShowInvite)
    }

    /// Close the QR display and stop any login polling.
    pub fn dismiss_qr(&self) -> Result<(), ChatError> {
        self.send(SessionCommand::DismissQr)
    }

    pub fn cancel(&self) -> Result<(), ChatError> {
        self.send(SessionCommand::Cancel)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, ChatError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx))?;
        rx.await.map_err(|_| ChatError::SessionClosed)
    }

    /// Stop the session. Its stream and poll are cancelled.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown);
    }
}

struct ActiveStream {
    channel: EventChannel,
    request: PromptRequest,
    /// Panel output collected until the end frame
    buffer: String,
}

struct RecoveryFlow {
    id: u64,
    purpose: QrPurpose,
    retry: Option<PromptRequest>,
}

pub struct ChatSession {
    console: ConsoleSession,
    deps: SessionDeps,
    settings: ChatSettings,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    state: ChatState,
    stream: Option<ActiveStream>,
    recovery: Option<RecoveryFlow>,
    poll: Option<AuthPollState>,
    poll_task: TaskSlot,
    poll_tx: mpsc::UnboundedSender<PollOutcome>,
    poll_rx: mpsc::UnboundedReceiver<PollOutcome>,
    next_flow_id: u64,
    loading: Option<DisplayTarget>,
    qr: Option<QrPayload>,
    panel: String,
}

impl ChatSession {
    /// Spawn the session actor and return a handle to control it
    pub fn spawn(
        console: ConsoleSession,
        deps: SessionDeps,
        settings: ChatSettings,
        updates: mpsc::UnboundedSender<SessionUpdate>,
    ) -> ChatSessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        let session_id = console.id().clone();

        let session = Self {
            console,
            deps,
            settings,
            cmd_rx,
            updates,
            state: ChatState::Idle,
            stream: None,
            recovery: None,
            poll: None,
            poll_task: TaskSlot::new(),
            poll_tx,
            poll_rx,
            next_flow_id: 0,
            loading: None,
            qr: None,
            panel: String::new(),
        };

        tokio::spawn(session.run());

        ChatSessionHandle { session_id, cmd_tx }
    }

    async fn run(mut self) {
        tracing::debug!(session_id = %self.console.id(), "Chat session started");

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
                event = next_channel_event(&mut self.stream) => {
                    self.handle_channel_event(event).await;
                }
                Some(outcome) = self.poll_rx.recv() => {
                    self.handle_poll_outcome(outcome).await;
                }
            }
        }

        self.close_stream();
        self.poll_task.cancel();
        tracing::debug!(session_id = %self.console.id(), "Chat session stopped");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Submit { prompt_type, text } => self.submit(prompt_type, text).await,
            SessionCommand::SubmitSelection { prompt_type } => {
                let text = self
                    .deps
                    .editor
                    .get_current_select_content()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| self.deps.editor.get_all_content());
                self.submit(prompt_type, text).await;
            }
            SessionCommand::SetKnownTables(tables) => {
                let selection = self.console.set_known_tables(tables);
                self.report_selection(selection);
            }
            SessionCommand::SelectTables(tables) => {
                let selection = self.console.select_tables(tables);
                self.report_selection(selection);
            }
            SessionCommand::SetContext(context) => self.console.set_context(context),
            SessionCommand::ShowInvite => self.start_invite_flow().await,
            SessionCommand::DismissQr => self.dismiss_qr(),
            SessionCommand::Cancel => self.cancel(),
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the run loop
            SessionCommand::Shutdown => {}
        }
    }

    async fn submit(&mut self, prompt_type: PromptType, text: String) {
        if text.trim().is_empty() {
            tracing::debug!(session_id = %self.console.id(), "Ignoring empty prompt");
            return;
        }
        let request = self.console.build_prompt(prompt_type, text);
        self.dispatch(request).await;
    }

    /// Open a stream for `request`, or start a login when there is no
    /// credential. Any previous stream and recovery flow end first.
    async fn dispatch(&mut self, request: PromptRequest) {
        self.close_stream();
        self.clear_loading();
        self.stop_recovery();

        let Some(credential) = self.deps.credentials.get_credential() else {
            tracing::info!(session_id = %self.console.id(), "No credential, starting login");
            self.transition(ChatState::AuthRecovery);
            self.start_login_flow(Some(request), true).await;
            return;
        };

        self.transition(ChatState::Requesting);
        let target = if request.prompt_type.streams_into_editor() {
            DisplayTarget::Editor
        } else {
            self.panel.clear();
            self.emit(SessionUpdate::PanelOpened);
            DisplayTarget::Panel
        };
        self.set_loading(target);

        tracing::debug!(
            session_id = %self.console.id(),
            prompt_type = %request.prompt_type.as_str(),
            tables = request.table_names.len(),
            "Opening chat stream"
        );
        let channel = self.deps.transport.open(ChannelRequest {
            session_id: self.console.id().clone(),
            credential: credential.key,
            prompt: request.clone(),
        });
        self.stream = Some(ActiveStream {
            channel,
            request,
            buffer: String::new(),
        });
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => self.mark_streaming(),
            ChannelEvent::Message(raw) => {
                self.mark_streaming();
                tracing::trace!(session_id = %self.console.id(), %raw, "Frame received");
                self.handle_frame(classify(&raw)).await;
            }
            ChannelEvent::Error(message) => self.fail_stream(message),
        }
    }

    fn mark_streaming(&mut self) {
        if self.state == ChatState::Requesting {
            self.transition(ChatState::Streaming);
        }
    }

    async fn handle_frame(&mut self, frame: StreamFrame) {
        match frame.kind {
            FrameKind::Content => {
                let Some(active) = self.stream.as_mut() else {
                    return;
                };
                let payload = frame.payload.unwrap_or_default();
                if active.request.prompt_type.streams_into_editor() {
                    self.deps.editor.set_value(&payload, SetValueMode::Cover);
                } else {
                    active.buffer.push_str(&payload);
                }
            }
            FrameKind::End => self.complete_stream(),
            FrameKind::AuthRequired => {
                tracing::info!(session_id = %self.console.id(), "Server requires login");
                let retry = self.close_stream();
                self.clear_loading();
                self.transition(ChatState::AuthRecovery);
                self.start_login_flow(retry, true).await;
            }
            FrameKind::QuotaExceeded => {
                tracing::info!(session_id = %self.console.id(), "AI quota exhausted");
                self.close_stream();
                self.clear_loading();
                self.transition(ChatState::QuotaRecovery);
                self.start_invite_flow().await;
            }
            FrameKind::Malformed => {
                tracing::warn!(
                    session_id = %self.console.id(),
                    raw = %frame.raw,
                    "Skipping malformed frame"
                );
            }
        }
    }

    fn complete_stream(&mut self) {
        let Some(mut active) = self.stream.take() else {
            return;
        };
        self.clear_loading();

        if active.request.prompt_type.streams_into_editor() {
            self.deps
                .editor
                .set_value(RESPONSE_SEPARATOR, SetValueMode::Append);
        } else {
            active.buffer.push_str(RESPONSE_SEPARATOR);
            self.panel.push_str(&active.buffer);
            active.buffer.clear();
            self.emit(SessionUpdate::PanelContent(self.panel.clone()));
        }
        active.channel.close();

        self.transition(ChatState::Completed);
        self.transition(ChatState::Idle);
    }

    fn fail_stream(&mut self, message: String) {
        tracing::warn!(session_id = %self.console.id(), error = %message, "Chat stream failed");
        self.close_stream();
        self.clear_loading();
        self.transition(ChatState::Failed);
        self.emit(SessionUpdate::Notice(Notice::ChannelFailed(message)));
    }

    /// Close the active stream, returning the request it was serving.
    fn close_stream(&mut self) -> Option<PromptRequest> {
        let mut active = self.stream.take()?;
        active.channel.close();
        Some(active.request)
    }

    async fn start_login_flow(&mut self, retry: Option<PromptRequest>, poll: bool) {
        self.stop_recovery();
        let flow_id = self.allocate_flow_id();

        let qr = match self.deps.backend.login_qr_code().await {
            Ok(qr) => qr,
            Err(err) => return self.recovery_failed(err),
        };

        self.show_qr(QrPayload {
            purpose: QrPurpose::Login,
            image_url: qr.qr_image_url,
            tip: qr.tip,
            token: Some(qr.token.clone()),
        });

        if poll {
            let state = AuthPollState::new(
                qr.token,
                self.settings.poll_attempts,
                self.settings.poll_interval,
            );
            let task = ScheduledTask::spawn(
                "login-poll",
                poll_login_status(
                    self.deps.backend.clone(),
                    state.clone(),
                    flow_id,
                    self.poll_tx.clone(),
                ),
            );
            self.poll_task.replace(task);
            self.poll = Some(state);
        }

        tracing::debug!(
            session_id = %self.console.id(),
            flow_id,
            retry = retry.is_some(),
            "Login flow started"
        );
        self.recovery = Some(RecoveryFlow {
            id: flow_id,
            purpose: QrPurpose::Login,
            retry,
        });
    }

    async fn start_invite_flow(&mut self) {
        if self.deps.credentials.get_credential().is_none() {
            tracing::info!(session_id = %self.console.id(), "No credential, redirecting invite to login");
            self.transition(ChatState::AuthRecovery);
            self.start_login_flow(None, true).await;
            return;
        }

        self.stop_recovery();
        let flow_id = self.allocate_flow_id();

        let invite = match self.deps.backend.invite_qr_code().await {
            Ok(invite) => invite,
            Err(err) => return self.recovery_failed(err),
        };

        self.show_qr(QrPayload {
            purpose: QrPurpose::Invite,
            image_url: invite.qr_image_url,
            tip: invite.tip,
            token: None,
        });
        self.recovery = Some(RecoveryFlow {
            id: flow_id,
            purpose: QrPurpose::Invite,
            retry: None,
        });

        if self.state == ChatState::QuotaRecovery {
            self.transition(ChatState::Idle);
        }
    }

    async fn handle_poll_outcome(&mut self, outcome: PollOutcome) {
        let current = self.recovery.as_ref().map(|flow| flow.id);
        let polling = self
            .poll
            .as_ref()
            .is_some_and(|poll| poll.status == PollStatus::Polling);
        if current != Some(outcome.flow_id()) || !polling {
            tracing::debug!(
                session_id = %self.console.id(),
                flow_id = outcome.flow_id(),
                "Discarding stale poll outcome"
            );
            return;
        }

        match outcome {
            PollOutcome::Attempted { remaining, .. } => {
                if let Some(poll) = self.poll.as_mut() {
                    poll.attempts_remaining = remaining;
                }
            }
            PollOutcome::Resolved { credential, .. } => {
                self.poll_task.cancel();
                if let Some(poll) = self.poll.as_mut() {
                    poll.status = PollStatus::Resolved;
                }
                let retry = self.recovery.take().and_then(|flow| flow.retry);

                self.deps.credentials.set_credential(Credential::hosted(credential));
                if self.qr.take().is_some() {
                    self.emit(SessionUpdate::QrDismissed);
                }
                self.emit(SessionUpdate::Notice(Notice::LoggedIn));
                self.transition(ChatState::Idle);

                if let Some(request) = retry {
                    tracing::debug!(session_id = %self.console.id(), "Retrying prompt after login");
                    self.dispatch(request).await;
                }
            }
            PollOutcome::Expired { .. } => {
                self.poll_task.cancel();
                if let Some(poll) = self.poll.as_mut() {
                    poll.attempts_remaining = 0;
                    poll.status = PollStatus::Expired;
                }
                self.transition(ChatState::Failed);
                self.emit(SessionUpdate::Notice(Notice::PollBudgetExhausted));
            }
        }
    }

    /// End the recovery flow and hide its QR code. Returns whether anything
    /// was showing or running.
    fn stop_recovery(&mut self) -> bool {
        self.poll_task.cancel();
        if let Some(poll) = self.poll.as_mut() {
            if poll.status == PollStatus::Polling {
                poll.status = PollStatus::Cancelled;
            }
        }

        let had_flow = match self.recovery.take() {
            Some(flow) => {
                tracing::debug!(
                    session_id = %self.console.id(),
                    flow_id = flow.id,
                    purpose = ?flow.purpose,
                    "Recovery flow stopped"
                );
                true
            }
            None => false,
        };
        let had_qr = self.qr.take().is_some();
        if had_qr {
            self.emit(SessionUpdate::QrDismissed);
        }
        had_flow || had_qr
    }

    fn dismiss_qr(&mut self) {
        let stopped = self.stop_recovery();
        if stopped && (self.state.is_recovering() || self.state == ChatState::Failed) {
            self.transition(ChatState::Idle);
        }
    }

    fn cancel(&mut self) {
        self.close_stream();
        self.clear_loading();
        self.stop_recovery();
        self.transition(ChatState::Idle);
    }

    fn recovery_failed(&mut self, err: ChatError) {
        tracing::warn!(session_id = %self.console.id(), error = %err, "Failed to fetch QR code");
        self.transition(ChatState::Failed);
        self.emit(SessionUpdate::Notice(Notice::RecoveryFailed(err.to_string())));
    }

    fn show_qr(&mut self, payload: QrPayload) {
        self.qr = Some(payload.clone());
        self.emit(SessionUpdate::QrShown(payload));
    }

    fn report_selection(&mut self, selection: TableSelection) {
        if selection.over_soft_limit {
            self.emit(SessionUpdate::Notice(Notice::TooManyTables {
                selected: selection.selected,
                limit: self.console.table_soft_limit(),
            }));
        }
    }

    fn set_loading(&mut self, target: DisplayTarget) {
        self.clear_loading();
        self.loading = Some(target);
        self.emit(SessionUpdate::Loading {
            target,
            active: true,
        });
    }

    fn clear_loading(&mut self) {
        if let Some(target) = self.loading.take() {
            self.emit(SessionUpdate::Loading {
                target,
                active: false,
            });
        }
    }

    fn transition(&mut self, to: ChatState) {
        let from = self.state;
        if from == to {
            return;
        }
        tracing::debug!(session_id = %self.console.id(), %from, %to, "Chat state changed");
        self.state = to;
        self.emit(SessionUpdate::StateChanged { from, to });
    }

    fn allocate_flow_id(&mut self) -> u64 {
        self.next_flow_id += 1;
        self.next_flow_id
    }

    fn emit(&self, update: SessionUpdate) {
        // Presentation layer may already be gone
        let _ = self.updates.send(update);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            open_channels: self
                .stream
                .as_ref()
                .map_or(0, |active| usize::from(!active.channel.is_closed())),
            loading: self.loading,
            qr: self.qr.clone(),
            poll: self.poll.clone(),
            panel: self.panel.clone(),
            known_tables: self.console.known_tables().to_vec(),
            selected_tables: self.console.selected_tables().to_vec(),
        }
    }
}

/// Next event of the active stream. Pending forever when there is none; a
/// stream that ends without an end frame reports an error.
async fn next_channel_event(stream: &mut Option<ActiveStream>) -> ChannelEvent {
    match stream {
        Some(active) => active
            .channel
            .recv()
            .await
            .unwrap_or_else(|| ChannelEvent::Error("stream closed before completion".to_string())),
        None => std::future::pending().await,
    }
}
