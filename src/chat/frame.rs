//! Classification of raw chat stream frames

use serde::Deserialize;

/// Sentinel sent by the server after the last content frame.
pub const END_OF_STREAM: &str = "[DONE]";

/// Error codes meaning the caller must log in (again).
pub const LOGIN_REQUIRED_MARKERS: &[&str] = &["60001", "60002", "60003"];

/// Error codes meaning the account ran out of AI uses.
pub const QUOTA_EXCEEDED_MARKERS: &[&str] = &["60004", "60005"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Content,
    End,
    AuthRequired,
    QuotaExceeded,
    Malformed,
}

/// One server-pushed message and what it means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub raw: String,
    pub kind: FrameKind,
    /// Decoded `content` field, present for `Content` frames only
    pub payload: Option<String>,
}

impl StreamFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::End | FrameKind::AuthRequired | FrameKind::QuotaExceeded
        )
    }
}

#[derive(Deserialize)]
struct ContentFrame {
    content: String,
}

/// Classify a raw frame.
///
/// Error markers are matched as plain substrings on every non-sentinel
/// frame, including frames that also decode as valid content. Login markers
/// win over quota markers.
pub fn classify(raw: &str) -> StreamFrame {
    if raw == END_OF_STREAM {
        return StreamFrame {
            raw: raw.to_string(),
            kind: FrameKind::End,
            payload: None,
        };
    }

    let (mut kind, mut payload) = match serde_json::from_str::<ContentFrame>(raw) {
        Ok(frame) => (FrameKind::Content, Some(frame.content)),
        Err(_) => (FrameKind::Malformed, None),
    };

    if contains_any(raw, LOGIN_REQUIRED_MARKERS) {
        kind = FrameKind::AuthRequired;
        payload = None;
    } else if contains_any(raw, QUOTA_EXCEEDED_MARKERS) {
        kind = FrameKind::QuotaExceeded;
        payload = None;
    }

    StreamFrame {
        raw: raw.to_string(),
        kind,
        payload,
    }
}

fn contains_any(raw: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| raw.contains(marker))
}
