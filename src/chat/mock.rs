//! Mock transport and backend for deterministic testing
//!
//! [`MockTransport`] replays scripted frames instead of opening HTTP streams
//! and records every request it was asked to open. [`MockBackend`] serves
//! canned QR payloads and can be told when login polling should succeed.
//!
//! # Example
//! ```no_run
//! use aiconsole::chat::mock::{MockFrame, MockTransport};
//!
//! let transport = MockTransport::new().with_script(vec![
//!     MockFrame::content("SELECT"),
//!     MockFrame::content(" * FROM t"),
//!     MockFrame::done(),
//! ]);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::chat::backend::{AiBackend, InviteQrCode, LoginQrCode, LoginStatus};
use crate::chat::channel::{
    ChannelCloser, ChannelEvent, ChannelRequest, EventChannel, StreamTransport, CHANNEL_BUFFER,
};
use crate::chat::error::ChatError;
use crate::chat::frame::END_OF_STREAM;
use crate::task::ScheduledTask;

/// One scripted step of a mock stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFrame {
    /// Deliver a raw frame
    Message(String),
    /// Fail the stream; nothing follows
    Error(String),
    /// Keep the stream open without sending anything
    Hold,
}

impl MockFrame {
    pub fn content(text: &str) -> Self {
        MockFrame::Message(serde_json::json!({ "content": text }).to_string())
    }

    pub fn done() -> Self {
        MockFrame::Message(END_OF_STREAM.to_string())
    }

    pub fn raw(text: impl Into<String>) -> Self {
        MockFrame::Message(text.into())
    }
}

#[derive(Default)]
struct MockTransportState {
    queued: VecDeque<Vec<MockFrame>>,
    requests: Vec<ChannelRequest>,
    closers: Vec<ChannelCloser>,
}

/// Transport that replays scripts. Each open uses the next queued script,
/// falling back to the default script (which holds the stream open unless
/// replaced).
#[derive(Clone)]
pub struct MockTransport {
    script: Vec<MockFrame>,
    frame_delay: Duration,
    state: Arc<Mutex<MockTransportState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: vec![MockFrame::Hold],
            frame_delay: Duration::ZERO,
            state: Arc::new(Mutex::new(MockTransportState::default())),
        }
    }

    /// Script used by every open without a queued script
    pub fn with_script(mut self, frames: Vec<MockFrame>) -> Self {
        self.script = frames;
        self
    }

    /// Delay before each scripted frame (simulates streaming)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    /// Script for the next open only
    pub fn queue_script(&self, frames: Vec<MockFrame>) {
        self.state.lock().queued.push_back(frames);
    }

    /// Requests seen so far, in open order
    pub fn captured_requests(&self) -> Vec<ChannelRequest> {
        self.state.lock().requests.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Channels opened and not yet closed
    pub fn live_channels(&self) -> usize {
        self.state
            .lock()
            .closers
            .iter()
            .filter(|closer| !closer.is_closed())
            .count()
    }
}

impl StreamTransport for MockTransport {
    fn open(&self, request: ChannelRequest) -> EventChannel {
        let script = {
            let mut state = self.state.lock();
            state.requests.push(request);
            state
                .queued
                .pop_front()
                .unwrap_or_else(|| self.script.clone())
        };

        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let delay = self.frame_delay;
        let reader = ScheduledTask::spawn("mock-stream", async move {
            if tx.send(ChannelEvent::Opened).await.is_err() {
                return;
            }
            for frame in script {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                match frame {
                    MockFrame::Message(raw) => {
                        if tx.send(ChannelEvent::Message(raw)).await.is_err() {
                            return;
                        }
                    }
                    MockFrame::Error(message) => {
                        let _ = tx.send(ChannelEvent::Error(message)).await;
                        return;
                    }
                    MockFrame::Hold => std::future::pending::<()>().await,
                }
            }
        });

        let channel = EventChannel::new(rx, Some(reader));
        self.state.lock().closers.push(channel.closer());
        channel
    }
}

struct MockBackendState {
    login_qr: LoginQrCode,
    invite_qr: InviteQrCode,
    resolve_after: Option<(usize, String)>,
    fail_login_qr: bool,
    fail_login_status: bool,
    fail_invite_qr: bool,
    login_qr_calls: usize,
    login_status_calls: usize,
    invite_qr_calls: usize,
}

/// Backend with canned QR payloads. Login polling never resolves unless
/// configured with [`MockBackend::resolving_after`].
pub struct MockBackend {
    state: Mutex<MockBackendState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockBackendState {
                login_qr: LoginQrCode {
                    qr_image_url: "https://qr.test/login.png".to_string(),
                    token: "login-token".to_string(),
                    tip: "Scan to log in".to_string(),
                },
                invite_qr: InviteQrCode {
                    qr_image_url: "https://qr.test/invite.png".to_string(),
                    tip: "Invite friends for more uses".to_string(),
                },
                resolve_after: None,
                fail_login_qr: false,
                fail_login_status: false,
                fail_invite_qr: false,
                login_qr_calls: 0,
                login_status_calls: 0,
                invite_qr_calls: 0,
            }),
        }
    }

    /// Login status returns `key` from the `checks`-th check on
    pub fn resolving_after(self, checks: usize, key: impl Into<String>) -> Self {
        self.state.lock().resolve_after = Some((checks, key.into()));
        self
    }

    pub fn failing_login_qr(self) -> Self {
        self.state.lock().fail_login_qr = true;
        self
    }

    pub fn failing_login_status(self) -> Self {
        self.state.lock().fail_login_status = true;
        self
    }

    pub fn failing_invite_qr(self) -> Self {
        self.state.lock().fail_invite_qr = true;
        self
    }

    pub fn login_qr_calls(&self) -> usize {
        self.state.lock().login_qr_calls
    }

    pub fn login_status_calls(&self) -> usize {
        self.state.lock().login_status_calls
    }

    pub fn invite_qr_calls(&self) -> usize {
        self.state.lock().invite_qr_calls
    }
}

#[async_trait]
impl AiBackend for MockBackend {
    async fn login_qr_code(&self) -> Result<LoginQrCode, ChatError> {
        let mut state = self.state.lock();
        state.login_qr_calls += 1;
        if state.fail_login_qr {
            return Err(ChatError::Rejected("login QR unavailable".to_string()));
        }
        Ok(state.login_qr.clone())
    }

    async fn login_status(&self, _token: &str) -> Result<LoginStatus, ChatError> {
        let mut state = self.state.lock();
        state.login_status_calls += 1;
        if state.fail_login_status {
            return Err(ChatError::Rejected("login status unavailable".to_string()));
        }
        let api_key = match state.resolve_after {
            Some((checks, ref key)) if state.login_status_calls >= checks => Some(key.clone()),
            _ => None,
        };
        Ok(LoginStatus { api_key })
    }

    async fn invite_qr_code(&self) -> Result<InviteQrCode, ChatError> {
        let mut state = self.state.lock();
        state.invite_qr_calls += 1;
        if state.fail_invite_qr {
            return Err(ChatError::Rejected("invite QR unavailable".to_string()));
        }
        Ok(state.invite_qr.clone())
    }
}
