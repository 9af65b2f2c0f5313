use std::fmt;

use tokio_tungstenite::tungstenite::{
    self, Message,
    protocol::{CloseFrame, frame::coding::CloseCode},
};

/// One unit of communication exchanged over the connection.
///
/// Frames are created where a line is read or a message is decoded, consumed
/// exactly once (sent or displayed) and never mutated in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseDetail>),
    /// Transport failure reported while receiving. Never sent.
    Error(String),
}

/// Status code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseDetail {
    pub code: u16,
    pub reason: String,
}

impl Frame {
    /// Classifies a decoded websocket message.
    ///
    /// Raw frames are handed back unclassified; they only surface when the
    /// transport is misconfigured and carry nothing the chat can interpret.
    pub fn from_message(message: Message) -> Result<Self, Message> {
        let frame = match message {
            Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            Message::Binary(data) => Frame::Binary(data.to_vec()),
            Message::Ping(data) => Frame::Ping(data.to_vec()),
            Message::Pong(data) => Frame::Pong(data.to_vec()),
            Message::Close(close) => Frame::Close(close.map(CloseDetail::from)),
            raw @ Message::Frame(_) => return Err(raw),
        };
        Ok(frame)
    }

    pub fn from_error(error: &tungstenite::Error) -> Self {
        Frame::Error(error.to_string())
    }

    /// Converts an outbound frame into its wire message. Error frames have no
    /// wire representation.
    pub fn into_message(self) -> Option<Message> {
        let message = match self {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close(detail) => Message::Close(detail.map(CloseFrame::from)),
            Frame::Error(_) => return None,
        };
        Some(message)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Binary(_) => "binary",
            Frame::Ping(_) => "ping",
            Frame::Pong(_) => "pong",
            Frame::Close(_) => "close",
            Frame::Error(_) => "error",
        }
    }
}

impl From<CloseFrame> for CloseDetail {
    fn from(frame: CloseFrame) -> Self {
        Self {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().to_owned(),
        }
    }
}

impl From<CloseDetail> for CloseFrame {
    fn from(detail: CloseDetail) -> Self {
        Self {
            code: CloseCode::from(detail.code),
            reason: detail.reason.into(),
        }
    }
}

impl fmt::Display for CloseDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.reason)
        }
    }
}
