//! Session driver tying keyboard, queue, connection and console together.
//!
//! Three duties run concurrently until one of them ends the session:
//!
//! - the input thread turns typed lines into frames on the [`OutboundQueue`];
//! - the writer drains the queue (and the dispatcher's control lane) into the
//!   outbound half of the connection, one send at a time;
//! - the [`Dispatcher`] handles inbound messages in arrival order.
//!
//! Writer and dispatcher are futures polled by the same task; only the
//! keyboard read gets its own thread because it blocks.

use std::{future::Future, io::BufRead, time::Duration};

use anyhow::{Context, Result};
use futures_util::{Sink, SinkExt, Stream};
use tokio::{
    io::AsyncWrite,
    select,
    sync::mpsc,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tokio_tungstenite::tungstenite::{self, Message, protocol::CloseFrame};
use tracing::{debug, info, warn};

use crate::{
    dispatcher::{Control, DispatchOutcome, Dispatcher, control_lane},
    frame::{CloseDetail, Frame},
    input::{InputEnd, InputSource, SessionName},
    queue::{OutboundQueue, outbound_queue},
};

/// Time the writer gets to finish an in-flight send and emit a close frame
/// once the session is over.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Local input reached end-of-file or the exit command.
    InputEnded,
    /// Reading local input failed. Lines read before the failure were sent.
    InputFailed(String),
    /// The peer performed a close handshake.
    PeerClosed(Option<CloseDetail>),
    /// The inbound stream ended without a close frame.
    ConnectionLost,
    /// A send or receive failed.
    ConnectionError(String),
    /// The shutdown signal fired.
    Cancelled,
}

impl From<DispatchOutcome> for Termination {
    fn from(outcome: DispatchOutcome) -> Self {
        match outcome {
            DispatchOutcome::PeerClosed(detail) => Termination::PeerClosed(detail),
            DispatchOutcome::Failed(detail) => Termination::ConnectionError(detail),
            DispatchOutcome::EndOfStream => Termination::ConnectionLost,
            DispatchOutcome::ClosedLocally => Termination::Cancelled,
        }
    }
}

/// One chat session over one established connection.
pub struct Pump<Si, St> {
    outbound: Si,
    inbound: St,
    name: SessionName,
    heartbeat: Option<Duration>,
    close_grace: Duration,
    manual_pongs: bool,
}

impl<Si, St> Pump<Si, St>
where
    Si: Sink<Message, Error = tungstenite::Error> + Unpin,
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    /// Wraps the two halves of an open connection, e.g. the result of
    /// `StreamExt::split` on a `WebSocketStream`.
    pub fn new(outbound: Si, inbound: St, name: SessionName) -> Self {
        Self {
            outbound,
            inbound,
            name,
            heartbeat: None,
            close_grace: DEFAULT_CLOSE_GRACE,
            manual_pongs: false,
        }
    }

    /// Sends a ping every `period` while the session is open.
    pub fn with_heartbeat(mut self, period: Duration) -> Self {
        self.heartbeat = Some(period);
        self
    }

    /// Has the writer answer every ping with a pong. Only for transports that
    /// do not reply on their own; a `WebSocketStream` already does.
    pub fn with_manual_pongs(mut self) -> Self {
        self.manual_pongs = true;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Runs the session until input ends, the connection ends, or `shutdown`
    /// completes, whichever happens first.
    pub async fn run_until<R, W, F>(self, input: R, display: W, shutdown: F) -> Result<Termination>
    where
        R: BufRead + Send + 'static,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let Pump {
            mut outbound,
            mut inbound,
            name,
            heartbeat,
            close_grace,
            manual_pongs,
        } = self;
        tokio::pin!(shutdown);

        let (producer, mut queue) = outbound_queue();
        let (control_tx, mut control_rx) = control_lane();
        let mut dispatcher = Dispatcher::new(display, control_tx);
        if manual_pongs {
            dispatcher = dispatcher.with_manual_pongs();
        }

        let mut input_end = InputSource::new(input, name.clone())
            .spawn(producer)
            .context("failed to spawn input thread")?;
        info!(%name, "chat session started");

        let writer = write_loop(&mut outbound, &mut queue, &mut control_rx, heartbeat);
        tokio::pin!(writer);

        let first = {
            let dispatch = dispatcher.run(&mut inbound);
            tokio::pin!(dispatch);

            select! {
                biased;
                _ = &mut shutdown => Finished::Cancelled,
                outcome = &mut dispatch => Finished::Dispatcher(outcome),
                exit = &mut writer => Finished::Writer(exit),
            }
        };

        let termination = match first {
            Finished::Writer(exit) => writer_termination(exit, input_end.try_recv().ok()),
            Finished::Dispatcher(outcome) => {
                drain_writer(dispatcher, writer, close_grace).await;
                Termination::from(outcome?)
            }
            Finished::Cancelled => {
                info!("interrupted; closing connection");
                drain_writer(dispatcher, writer, close_grace).await;
                Termination::Cancelled
            }
        };

        info!(?termination, "chat session ended");
        Ok(termination)
    }

    pub async fn run_until_ctrl_c<R, W>(self, input: R, display: W) -> Result<Termination>
    where
        R: BufRead + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        self.run_until(input, display, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

enum Finished {
    Writer(Result<WriterExit, tungstenite::Error>),
    Dispatcher(Result<DispatchOutcome>),
    Cancelled,
}

#[derive(Debug, PartialEq, Eq)]
enum WriterExit {
    /// Every producer is gone and the queue is empty.
    InputEnded,
    /// Close requested over the control lane, or the lane itself closed.
    CloseRequested,
}

fn writer_termination(
    exit: Result<WriterExit, tungstenite::Error>,
    input_end: Option<InputEnd>,
) -> Termination {
    match exit {
        Ok(WriterExit::InputEnded) => match input_end {
            Some(InputEnd::ReadFailed(error)) => Termination::InputFailed(error.to_string()),
            _ => Termination::InputEnded,
        },
        Ok(WriterExit::CloseRequested) => Termination::Cancelled,
        Err(error) => {
            warn!(%error, "failed to send frame");
            Termination::ConnectionError(error.to_string())
        }
    }
}

/// Closes the control lane and gives the writer `grace` to finish the send in
/// progress and emit a close frame.
async fn drain_writer<W, Fut>(mut dispatcher: Dispatcher<W>, writer: Fut, grace: Duration)
where
    W: AsyncWrite + Unpin,
    Fut: Future<Output = Result<WriterExit, tungstenite::Error>>,
{
    dispatcher.close();
    drop(dispatcher);

    match time::timeout(grace, writer).await {
        Ok(Ok(exit)) => debug!(?exit, "writer stopped"),
        Ok(Err(error)) => debug!(%error, "writer failed while closing"),
        Err(_) => warn!(?grace, "writer did not stop within the close grace period"),
    }
}

/// The only code that writes to the connection.
///
/// Control requests are served before queued lines, but never interrupt a send
/// that has already started.
async fn write_loop<Si>(
    sink: &mut Si,
    queue: &mut OutboundQueue,
    control: &mut mpsc::UnboundedReceiver<Control>,
    heartbeat: Option<Duration>,
) -> Result<WriterExit, tungstenite::Error>
where
    Si: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut heartbeat = heartbeat.map(heartbeat_interval);

    loop {
        select! {
            biased;
            request = control.recv() => match request {
                Some(Control::Pong(payload)) => sink.send(Message::Pong(payload.into())).await?,
                Some(Control::Close(detail)) => {
                    close_connection(sink, detail, queue.pending()).await;
                    return Ok(WriterExit::CloseRequested);
                }
                None => {
                    close_connection(sink, None, queue.pending()).await;
                    return Ok(WriterExit::CloseRequested);
                }
            },
            _ = next_tick(&mut heartbeat) => {
                debug!("sending heartbeat ping");
                sink.send(Message::Ping(Vec::new().into())).await?;
            }
            frame = queue.dequeue() => match frame {
                Some(frame) => send_frame(sink, frame).await?,
                None => {
                    close_connection(sink, None, 0).await;
                    return Ok(WriterExit::InputEnded);
                }
            },
        }
    }
}

async fn send_frame<Si>(sink: &mut Si, frame: Frame) -> Result<(), tungstenite::Error>
where
    Si: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let kind = frame.kind();
    match frame.into_message() {
        Some(message) => sink.send(message).await,
        None => {
            warn!(kind, "frame has no wire representation; skipping");
            Ok(())
        }
    }
}

/// Sends a close frame and shuts the sink. Closing an already closed
/// connection is not an error.
async fn close_connection<Si>(sink: &mut Si, detail: Option<CloseDetail>, discarded: usize)
where
    Si: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    if discarded > 0 {
        info!(discarded, "dropping queued lines that were never sent");
    }

    let close = Message::Close(detail.map(CloseFrame::from));
    let result = match sink.send(close).await {
        Ok(()) => sink.close().await,
        Err(error) => Err(error),
    };

    match result {
        Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {}
        Err(error) => debug!(%error, "failed to close connection cleanly"),
    }
}

fn heartbeat_interval(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
