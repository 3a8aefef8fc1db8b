pub mod autosave;
pub mod chat;
pub mod config;
pub mod data;
pub mod editor;
pub mod session;
pub mod task;
pub mod util;
pub mod workspace;

pub use autosave::{AutosaveCoordinator, DraftStorage, MemoryDraftStorage};
pub use chat::{
    AiBackend, ChatError, ChatSession, ChatSessionHandle, ChatState, CredentialContext,
    HttpAiBackend, PromptType, SessionUpdate, SseTransport, StreamTransport,
};
pub use config::Config;
pub use data::{AppStateStore, Database, DraftStore};
pub use editor::{BufferEditor, EditorSurface, SetValueMode};
pub use session::{ConsoleSession, ExecutionContext, SessionId};
pub use workspace::{ConsoleWorkspace, SharedServices};
