//! Local user input: the session name and the stream of typed lines.
//!
//! Reading the keyboard blocks, so [`InputSource::spawn`] moves the reader onto
//! its own OS thread. The only link back to the async side is the outbound
//! queue; when the thread finishes it reports why on a oneshot channel, then
//! drops its producer and the writer sees the queue close.

use std::{
    borrow::Cow,
    fmt,
    io::{self, BufRead, Write},
    thread,
};

use anyhow::{Context, Result, bail};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    frame::Frame,
    queue::{QueueClosed, QueueProducer},
};

const LINE_ENDINGS: &[char] = &['\n', '\r'];
const NAME_PROMPT: &str = "Please enter your name: ";

/// Typing this line ends the session like end-of-file.
pub const EXIT_COMMAND: &str = "/exit";

/// Display name prepended to every outbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionName(String);

impl SessionName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            bail!("name cannot be empty");
        }
        Ok(Self(name))
    }

    /// Writes the name prompt and reads one line as the session name.
    pub fn prompt<R, W>(reader: &mut R, prompt: &mut W) -> Result<Self>
    where
        R: BufRead,
        W: Write,
    {
        prompt.write_all(NAME_PROMPT.as_bytes())?;
        prompt.flush()?;

        let mut line = String::new();
        let bytes = reader
            .read_line(&mut line)
            .context("failed to read name")?;
        if bytes == 0 {
            bail!("input closed before a name was entered");
        }
        Self::new(line)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds the outbound text frame for one typed line.
    pub fn compose(&self, line: &str) -> Frame {
        Frame::Text(format!("{}: {line}", self.0))
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why the input thread stopped producing frames.
#[derive(Debug)]
pub enum InputEnd {
    EndOfFile,
    ExitCommand,
    /// The outbound queue was dropped; the session ended from the network side.
    QueueClosed,
    ReadFailed(io::Error),
}

/// Finite, non-restartable sequence of lines typed by the local user.
pub struct InputSource<R> {
    reader: R,
    name: SessionName,
    buffer: Vec<u8>,
}

impl<R> InputSource<R>
where
    R: BufRead,
{
    pub fn new(reader: R, name: SessionName) -> Self {
        Self {
            reader,
            name,
            buffer: Vec::with_capacity(64),
        }
    }

    /// Blocks until the next line is available and turns it into a frame.
    ///
    /// Bytes that are not valid UTF-8 are replaced rather than ending input.
    fn next_input(&mut self) -> io::Result<Next> {
        self.buffer.clear();
        let bytes = self.reader.read_until(b'\n', &mut self.buffer)?;
        if bytes == 0 {
            return Ok(Next::EndOfFile);
        }

        let text = String::from_utf8_lossy(&self.buffer);
        if let Cow::Owned(_) = text {
            warn!(bytes, "typed line is not valid UTF-8; sending it with replacements");
        }
        let line = text.trim_end_matches(LINE_ENDINGS);
        if line.trim() == EXIT_COMMAND {
            return Ok(Next::Exit);
        }
        Ok(Next::Frame(self.name.compose(line)))
    }

    /// Feeds every line into `queue` until input ends.
    pub fn pump_into(mut self, queue: &QueueProducer) -> InputEnd {
        loop {
            let frame = match self.next_input() {
                Ok(Next::Frame(frame)) => frame,
                Ok(Next::Exit) => return InputEnd::ExitCommand,
                Ok(Next::EndOfFile) => return InputEnd::EndOfFile,
                Err(error) => return InputEnd::ReadFailed(error),
            };
            if let Err(QueueClosed(frame)) = queue.enqueue(frame) {
                debug!(kind = frame.kind(), "dropping line typed after session end");
                return InputEnd::QueueClosed;
            }
        }
    }
}

impl<R> InputSource<R>
where
    R: BufRead + Send + 'static,
{
    /// Runs the reader on a dedicated thread and returns where the thread
    /// reports why it stopped.
    ///
    /// The thread owns `queue` and drops it right after sending the report,
    /// so once the writer sees the queue close the report is already waiting.
    /// The thread itself is detached, since a blocked keyboard read cannot be
    /// interrupted.
    pub fn spawn(self, queue: QueueProducer) -> io::Result<oneshot::Receiver<InputEnd>> {
        let (report, ended) = oneshot::channel();
        thread::Builder::new()
            .name("chat-input".into())
            .spawn(move || {
                let end = self.pump_into(&queue);
                match &end {
                    InputEnd::ReadFailed(error) => warn!(?error, "failed to read input"),
                    other => debug!(?other, "input finished"),
                }
                let _ = report.send(end);
                drop(queue);
            })?;
        Ok(ended)
    }
}

enum Next {
    Frame(Frame),
    Exit,
    EndOfFile,
}
