//! Streaming AI chat for SQL consoles

pub mod backend;
pub mod channel;
pub mod credentials;
pub mod error;
pub mod events;
pub mod frame;
pub mod mock;
pub mod prompt;
pub mod recovery;
pub mod session;
pub mod transport;

pub use backend::{AiBackend, HttpAiBackend, InviteQrCode, LoginQrCode, LoginStatus};
pub use channel::{ChannelCloser, ChannelEvent, ChannelRequest, EventChannel, StreamTransport};
pub use credentials::{
    Credential, CredentialContext, MemoryCredentials, StoredCredentials, HOSTED_PROVIDER,
};
pub use error::ChatError;
pub use events::{ChatState, DisplayTarget, Notice, SessionUpdate};
pub use frame::{classify, FrameKind, StreamFrame};
pub use prompt::{PromptRequest, PromptType};
pub use recovery::{AuthPollState, ChatSettings, PollStatus, QrPayload, QrPurpose};
pub use session::{ChatSession, ChatSessionHandle, SessionDeps, SessionSnapshot, RESPONSE_SEPARATOR};
pub use transport::{SseTransport, StreamMethod};
