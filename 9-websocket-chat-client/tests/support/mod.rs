//! In-memory keyboard, connection and console for driving a session, plus a
//! one-connection websocket server on the loopback interface.

#![allow(dead_code)]

use std::{
    io::{self, BufReader, Read},
    net::SocketAddr,
    pin::Pin,
    sync::mpsc as std_mpsc,
    task::{Context, Poll},
    time::Duration,
};

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::{
    io::{AsyncBufReadExt, DuplexStream},
    net::TcpListener,
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{
        self, Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

pub const STEP_TIMEOUT: Duration = Duration::from_secs(3);

/// Test side of a keyboard whose reads block until a line is typed. Dropping
/// it is end-of-file.
pub struct Keyboard {
    tx: std_mpsc::Sender<Vec<u8>>,
}

pub struct KeyboardInput {
    rx: std_mpsc::Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    offset: usize,
}

pub fn keyboard() -> (Keyboard, BufReader<KeyboardInput>) {
    let (tx, rx) = std_mpsc::channel();
    let input = KeyboardInput {
        rx,
        chunk: Vec::new(),
        offset: 0,
    };
    (Keyboard { tx }, BufReader::new(input))
}

impl Keyboard {
    pub fn type_line(&self, line: &str) {
        self.tx
            .send(format!("{line}\n").into_bytes())
            .expect("input thread should still be reading");
    }
}

impl Read for KeyboardInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.offset == self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.offset = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let remaining = &self.chunk[self.offset..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.offset += count;
        Ok(count)
    }
}

pub type Inbound = UnboundedReceiverStream<Result<Message, tungstenite::Error>>;

/// Outbound half of an in-memory connection.
pub struct ClientSink {
    tx: mpsc::UnboundedSender<Message>,
    closed: bool,
}

impl Sink<Message> for ClientSink {
    type Error = tungstenite::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.closed {
            return Poll::Ready(Err(tungstenite::Error::AlreadyClosed));
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        self.tx
            .send(item)
            .map_err(|_| tungstenite::Error::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.closed = true;
        Poll::Ready(Ok(()))
    }
}

/// Remote end of an in-memory connection.
pub struct Peer {
    pub to_client: mpsc::UnboundedSender<Result<Message, tungstenite::Error>>,
    pub from_client: mpsc::UnboundedReceiver<Message>,
}

pub fn wire() -> (ClientSink, Inbound, Peer) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    let sink = ClientSink {
        tx: outbound,
        closed: false,
    };
    let peer = Peer {
        to_client,
        from_client,
    };
    (sink, UnboundedReceiverStream::new(inbound), peer)
}

impl Peer {
    pub fn send(&self, message: Message) {
        self.to_client
            .send(Ok(message))
            .expect("client should still be receiving");
    }

    pub async fn recv(&mut self) -> Option<Message> {
        timeout(STEP_TIMEOUT, self.from_client.recv())
            .await
            .expect("timed out waiting for a frame from the client")
    }

    /// Everything the client sent that has not been received yet.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut sent = Vec::new();
        while let Ok(message) = self.from_client.try_recv() {
            sent.push(message);
        }
        sent
    }
}

pub fn text(body: &str) -> Message {
    Message::Text(body.into())
}

/// Reading end of the console the dispatcher writes to.
pub struct Console {
    reader: tokio::io::BufReader<DuplexStream>,
}

pub fn console() -> (DuplexStream, Console) {
    let (display, reader) = tokio::io::duplex(64 * 1024);
    let console = Console {
        reader: tokio::io::BufReader::new(reader),
    };
    (display, console)
}

impl Console {
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let bytes = timeout(STEP_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for console output")
            .expect("console read");
        if bytes == 0 {
            return None;
        }
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }

    pub async fn read_all(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.read_line().await {
            lines.push(line);
        }
        lines
    }
}

/// How the test server reacts to the first text frame it receives.
#[derive(Clone, Copy)]
pub enum ServerMode {
    Echo,
    EchoThenClose,
}

pub async fn spawn_server(mode: ServerMode) -> anyhow::Result<(SocketAddr, JoinHandle<Vec<String>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let mut received = Vec::new();
        let Ok((stream, _)) = listener.accept().await else {
            return received;
        };
        let Ok(mut ws) = accept_async(stream).await else {
            return received;
        };

        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(text) => {
                    received.push(text.as_str().to_owned());
                    if ws.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                    if let ServerMode::EchoThenClose = mode {
                        let close = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "bye".into(),
                        };
                        let _ = ws.close(Some(close)).await;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        received
    });

    Ok((addr, server))
}
