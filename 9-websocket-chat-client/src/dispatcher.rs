//! Inbound side of the session: one receive loop that classifies each message
//! and reacts to it in arrival order.
//!
//! The dispatcher never writes to the connection itself. Replies (pong, close)
//! go over the control lane to the writer, which is the only code that sends.
//!
//! A `WebSocketStream` queues the pong for a ping on its own, so by default a
//! ping only gets logged here. Transports without that behaviour opt in with
//! [`Dispatcher::with_manual_pongs`].

use anyhow::{Context, Result};
use futures_util::{Stream, StreamExt};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

use crate::frame::{CloseDetail, Frame};

/// Requests the dispatcher makes of the writer. The writer serves these ahead
/// of queued chat lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Pong(Vec<u8>),
    Close(Option<CloseDetail>),
}

pub fn control_lane() -> (
    mpsc::UnboundedSender<Control>,
    mpsc::UnboundedReceiver<Control>,
) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Receiving,
    Closing,
    Terminated,
}

/// How the receive loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The peer sent a close frame; a close was echoed back.
    PeerClosed(Option<CloseDetail>),
    /// The transport reported an error while receiving.
    Failed(String),
    /// The stream ended without a close handshake.
    EndOfStream,
    /// [`Dispatcher::close`] was called before the loop saw any of the above.
    ClosedLocally,
}

/// Result of handling a single inbound item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop(DispatchOutcome),
    /// The dispatcher had already terminated; the item was not processed.
    Ignored,
}

pub struct Dispatcher<W> {
    display: W,
    control: mpsc::UnboundedSender<Control>,
    state: DispatchState,
    manual_pongs: bool,
}

impl<W> Dispatcher<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(display: W, control: mpsc::UnboundedSender<Control>) -> Self {
        Self {
            display,
            control,
            state: DispatchState::Receiving,
            manual_pongs: false,
        }
    }

    /// Answers pings by asking the writer for a pong, for transports that do
    /// not reply on their own.
    pub fn with_manual_pongs(mut self) -> Self {
        self.manual_pongs = true;
        self
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Receives and handles messages until the session ends.
    ///
    /// Cancel safe between messages: dropping the future while it waits on the
    /// stream loses nothing.
    pub async fn run<St>(&mut self, inbound: &mut St) -> Result<DispatchOutcome>
    where
        St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        while self.state == DispatchState::Receiving {
            let received = inbound.next().await;
            if let Step::Stop(outcome) = self.handle(received).await? {
                return Ok(outcome);
            }
        }
        Ok(DispatchOutcome::ClosedLocally)
    }

    /// Handles one result of a receive: a message, a transport error, or `None`
    /// for end of stream.
    pub async fn handle(
        &mut self,
        received: Option<Result<Message, tungstenite::Error>>,
    ) -> Result<Step> {
        if self.state != DispatchState::Receiving {
            debug!(state = ?self.state, "ignoring inbound message after termination");
            return Ok(Step::Ignored);
        }

        let frame = match received {
            None => {
                self.state = DispatchState::Terminated;
                self.write_line("*** connection lost").await?;
                return Ok(Step::Stop(DispatchOutcome::EndOfStream));
            }
            Some(Err(error)) => Frame::from_error(&error),
            Some(Ok(message)) => match Frame::from_message(message) {
                Ok(frame) => frame,
                Err(unexpected) => {
                    warn!(?unexpected, "received a frame that cannot be classified");
                    self.write_line(&format!("!!! ignoring unexpected frame: {unexpected:?}"))
                        .await?;
                    return Ok(Step::Continue);
                }
            },
        };

        self.dispatch(frame).await
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<Step> {
        match frame {
            Frame::Text(text) => self.write_line(text.trim_end()).await?,
            Frame::Binary(data) => {
                self.write_line(&format!(
                    "*** binary frame ({} bytes): {data:?}",
                    data.len()
                ))
                .await?;
            }
            Frame::Ping(payload) if self.manual_pongs => {
                self.send_control(Control::Pong(payload));
            }
            Frame::Ping(payload) => debug!(len = payload.len(), "ping answered by transport"),
            Frame::Pong(_) => self.write_line("*** pong received").await?,
            Frame::Close(detail) => {
                self.state = DispatchState::Closing;
                let notice = match &detail {
                    Some(detail) => format!("*** server closed the connection ({detail})"),
                    None => "*** server closed the connection".to_string(),
                };
                self.write_line(&notice).await?;
                // No await between the close request and returning, so the
                // loop always ends before the writer acts on it.
                self.send_control(Control::Close(detail.clone()));
                self.state = DispatchState::Terminated;
                return Ok(Step::Stop(DispatchOutcome::PeerClosed(detail)));
            }
            Frame::Error(detail) => {
                self.state = DispatchState::Terminated;
                self.write_line(&format!("!!! error during receive: {detail}"))
                    .await?;
                return Ok(Step::Stop(DispatchOutcome::Failed(detail)));
            }
        }
        Ok(Step::Continue)
    }

    /// Starts a local close. Returns `false` if the dispatcher had already
    /// terminated, in which case nothing is sent.
    pub fn close(&mut self) -> bool {
        if self.state == DispatchState::Terminated {
            return false;
        }
        self.state = DispatchState::Closing;
        self.send_control(Control::Close(None));
        self.state = DispatchState::Terminated;
        true
    }

    fn send_control(&self, control: Control) {
        if let Err(error) = self.control.send(control) {
            debug!(?error, "writer already stopped");
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut buffer = Vec::with_capacity(line.len() + 1);
        buffer.extend_from_slice(line.as_bytes());
        buffer.push(b'\n');
        self.display
            .write_all(&buffer)
            .await
            .context("failed to write to console")?;
        self.display
            .flush()
            .await
            .context("failed to flush console")
    }
}
