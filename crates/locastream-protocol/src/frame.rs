//! Frames exchanged with a connected peer.

use bytes::Bytes;
use std::sync::Arc;

/// One complete message as it travels over a connection.
///
/// Both variants are reference counted, so fanning a frame out to many
/// recipients clones a pointer rather than the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(Arc<str>),
    /// Binary frame.
    Binary(Bytes),
}

impl Frame {
    /// Create a text frame.
    #[must_use]
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Frame::Text(text.into())
    }

    /// Create a binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Frame::Binary(data.into())
    }

    /// Raw payload bytes, regardless of framing.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(data) => data,
        }
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this is a text frame.
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Frame::Text(_))
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text.into())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Frame::Binary(data.into())
    }
}
