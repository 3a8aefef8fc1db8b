//! Observable session state and the updates a session publishes

use std::fmt;

use crate::chat::recovery::QrPayload;

/// Lifecycle of a chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatState {
    #[default]
    Idle,
    Requesting,
    Streaming,
    Completed,
    AuthRecovery,
    QuotaRecovery,
    Failed,
}

impl ChatState {
    pub fn is_recovering(self) -> bool {
        matches!(self, ChatState::AuthRecovery | ChatState::QuotaRecovery)
    }
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChatState::Idle => "idle",
            ChatState::Requesting => "requesting",
            ChatState::Streaming => "streaming",
            ChatState::Completed => "completed",
            ChatState::AuthRecovery => "auth-recovery",
            ChatState::QuotaRecovery => "quota-recovery",
            ChatState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Where streamed output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayTarget {
    /// Written straight into the console editor
    Editor,
    /// Collected in the side panel
    Panel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The stream failed to open or dropped mid-response
    ChannelFailed(String),
    /// A QR code could not be fetched
    RecoveryFailed(String),
    /// Login polling ran out of attempts
    PollBudgetExhausted,
    /// Selection exceeds the soft table limit
    TooManyTables { selected: usize, limit: usize },
    LoggedIn,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::ChannelFailed(msg) => write!(f, "AI request failed: {msg}"),
            Notice::RecoveryFailed(msg) => write!(f, "Could not fetch QR code: {msg}"),
            Notice::PollBudgetExhausted => {
                f.write_str("Login QR code expired, dismiss it and try again")
            }
            Notice::TooManyTables { selected, limit } => write!(
                f,
                "{selected} tables selected, results may degrade above {limit}"
            ),
            Notice::LoggedIn => f.write_str("Logged in"),
        }
    }
}

/// Published by a session for its presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    StateChanged { from: ChatState, to: ChatState },
    Loading { target: DisplayTarget, active: bool },
    PanelOpened,
    /// Full panel text after a change
    PanelContent(String),
    QrShown(QrPayload),
    QrDismissed,
    Notice(Notice),
}
