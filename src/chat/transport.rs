//! Server-sent-event transport for the chat endpoint

use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::chat::channel::{
    ChannelEvent, ChannelRequest, EventChannel, StreamTransport, CHANNEL_BUFFER,
};
use crate::chat::error::ChatError;
use crate::task::ScheduledTask;

pub const CHAT_PATH: &str = "/api/ai/chat";

/// Header carrying the console's session id
pub const UID_HEADER: &str = "uid";

/// How the chat request is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMethod {
    /// Prompt fields in the query string
    #[default]
    Get,
    /// Prompt fields as a JSON body
    Post,
}

#[derive(Clone)]
pub struct SseTransport {
    client: Client,
    base_url: String,
    method: StreamMethod,
    credential_header: String,
}

impl SseTransport {
    pub fn new(
        base_url: impl Into<String>,
        method: StreamMethod,
        credential_header: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ChatError> {
        // No overall timeout: streams stay open as long as the server talks
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            method,
            credential_header: credential_header.into(),
        })
    }

    fn request_builder(&self, request: &ChannelRequest) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, CHAT_PATH);
        let builder = match self.method {
            StreamMethod::Get => self.client.get(url).query(&request.prompt.query_pairs()),
            StreamMethod::Post => self.client.post(url).json(&request.prompt),
        };
        builder
            .header(UID_HEADER, request.session_id.as_str())
            .header(self.credential_header.as_str(), request.credential.as_str())
    }
}

impl StreamTransport for SseTransport {
    fn open(&self, request: ChannelRequest) -> EventChannel {
        let mut source = match self.request_builder(&request).eventsource() {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!(
                    session_id = %request.session_id,
                    error = %err,
                    "Failed to build chat stream request"
                );
                return EventChannel::failed(
                    ChatError::ChannelSetup(err.to_string()).to_string(),
                );
            }
        };

        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let session_id = request.session_id.clone();
        let reader = ScheduledTask::spawn("chat-stream", async move {
            let mut opened = false;
            while let Some(event) = source.next().await {
                let forwarded = match event {
                    Ok(Event::Open) => {
                        opened = true;
                        tracing::debug!(%session_id, "Chat stream opened");
                        tx.send(ChannelEvent::Opened).await
                    }
                    Ok(Event::Message(message)) => {
                        tracing::trace!(%session_id, data = %message.data, "Chat stream frame");
                        tx.send(ChannelEvent::Message(message.data)).await
                    }
                    Err(err) => {
                        // The event source reconnects on its own unless closed
                        source.close();
                        tracing::debug!(%session_id, error = %err, "Chat stream ended with error");
                        let message = if opened {
                            err.to_string()
                        } else {
                            ChatError::ChannelSetup(err.to_string()).to_string()
                        };
                        let _ = tx.send(ChannelEvent::Error(message)).await;
                        break;
                    }
                };
                if forwarded.is_err() {
                    // Channel closed on our side
                    break;
                }
            }
            source.close();
        });

        EventChannel::new(rx, Some(reader))
    }
}
