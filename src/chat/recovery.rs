//! Login and invite recovery flows
//!
//! When the server asks for a login, the session shows a login QR code and
//! polls the login status endpoint until a credential is issued, the attempt
//! budget runs out, or the flow is cancelled. Polling runs as a background
//! task that reports back to the owning session over a channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::chat::backend::AiBackend;

/// Delay between login status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Login status checks before giving up.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 60;

/// Timing of the login status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatSettings {
    pub poll_interval: Duration,
    pub poll_attempts: u32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrPurpose {
    Login,
    Invite,
}

/// QR code currently presented to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrPayload {
    pub purpose: QrPurpose,
    pub image_url: String,
    pub tip: String,
    /// Login token being polled; invite codes have none
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Polling,
    Resolved,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPollState {
    pub token: String,
    pub attempts_remaining: u32,
    pub interval: Duration,
    pub status: PollStatus,
}

impl AuthPollState {
    pub fn new(token: impl Into<String>, attempts: u32, interval: Duration) -> Self {
        Self {
            token: token.into(),
            attempts_remaining: attempts,
            interval,
            status: PollStatus::Polling,
        }
    }
}

/// Progress reported by a polling task. `flow_id` identifies the recovery
/// flow that started it so stale reports can be ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Attempted { flow_id: u64, remaining: u32 },
    Resolved { flow_id: u64, credential: String },
    Expired { flow_id: u64 },
}

impl PollOutcome {
    pub fn flow_id(&self) -> u64 {
        match self {
            PollOutcome::Attempted { flow_id, .. }
            | PollOutcome::Resolved { flow_id, .. }
            | PollOutcome::Expired { flow_id } => *flow_id,
        }
    }
}

/// Poll the login status until a credential shows up or the budget is spent.
///
/// The first check happens one interval after the call. Failed checks are
/// logged and count against the budget.
pub async fn poll_login_status(
    backend: Arc<dyn AiBackend>,
    state: AuthPollState,
    flow_id: u64,
    tx: mpsc::UnboundedSender<PollOutcome>,
) {
    let mut ticker = interval_at(Instant::now() + state.interval, state.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut remaining = state.attempts_remaining;
    while remaining > 0 {
        ticker.tick().await;
        remaining -= 1;

        match backend.login_status(&state.token).await {
            Ok(status) => {
                if let Some(credential) = status.credential() {
                    tracing::info!(flow_id, "Login resolved");
                    let _ = tx.send(PollOutcome::Resolved {
                        flow_id,
                        credential: credential.to_string(),
                    });
                    return;
                }
            }
            Err(err) => {
                tracing::warn!(flow_id, remaining, error = %err, "Login status check failed");
            }
        }

        if tx.send(PollOutcome::Attempted { flow_id, remaining }).is_err() {
            return;
        }
    }

    tracing::info!(flow_id, "Login polling budget exhausted");
    let _ = tx.send(PollOutcome::Expired { flow_id });
}
