//! Event stream channel
//!
//! An [`EventChannel`] is the receiving end of one streaming connection. The
//! connection itself is driven by a reader task owned by the channel; closing
//! the channel (or dropping it) aborts that task and discards anything still
//! buffered, so no event is ever observed after `close()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::chat::prompt::PromptRequest;
use crate::session::SessionId;
use crate::task::ScheduledTask;

/// Buffered events per channel before the reader task waits.
pub const CHANNEL_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Connection established
    Opened,
    /// One raw frame
    Message(String),
    /// Connection failed or dropped; nothing follows
    Error(String),
}

/// Everything needed to open a chat stream for one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub session_id: SessionId,
    pub credential: String,
    pub prompt: PromptRequest,
}

/// Opens chat streams. Connection failures are delivered as a single
/// [`ChannelEvent::Error`] on the returned channel.
pub trait StreamTransport: Send + Sync {
    fn open(&self, request: ChannelRequest) -> EventChannel;
}

/// Cloneable close capability for an [`EventChannel`].
#[derive(Debug, Clone)]
pub struct ChannelCloser {
    closed: Arc<AtomicBool>,
    reader: Option<Arc<ScheduledTask>>,
}

impl ChannelCloser {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(ref reader) = self.reader {
            reader.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct EventChannel {
    events: mpsc::Receiver<ChannelEvent>,
    closer: ChannelCloser,
}

impl EventChannel {
    /// Wrap the receiving end of a transport's event queue. `reader` is the
    /// task feeding it, aborted when the channel closes.
    pub fn new(events: mpsc::Receiver<ChannelEvent>, reader: Option<ScheduledTask>) -> Self {
        Self {
            events,
            closer: ChannelCloser {
                closed: Arc::new(AtomicBool::new(false)),
                reader: reader.map(Arc::new),
            },
        }
    }

    /// A channel that fails immediately with `message`.
    pub fn failed(message: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 on a fresh channel, cannot fail
        let _ = tx.try_send(ChannelEvent::Error(message.into()));
        Self::new(rx, None)
    }

    pub fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }

    pub fn close(&mut self) {
        self.closer.close();
        self.events.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// Next event, or `None` once the channel is closed or the reader is gone.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        if self.is_closed() {
            return None;
        }
        let event = self.events.recv().await?;
        // Closed by another closer handle while we were waiting
        if self.is_closed() {
            return None;
        }
        Some(event)
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.closer.close();
    }
}
