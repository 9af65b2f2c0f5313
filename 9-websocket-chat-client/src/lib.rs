//! Interactive websocket chat client.
//!
//! One process, one connection, one local user. Lines typed on stdin are sent
//! as text frames prefixed with the user's name, while messages from the
//! server are printed as they arrive. Each module owns one piece of that flow:
//!
//! - [`cli`] parses the command-line interface and builds the server URL.
//! - [`frame`] classifies websocket messages into the frames the client
//!   understands.
//! - [`input`] reads the session name and turns typed lines into frames on a
//!   dedicated thread.
//! - [`queue`] is the FIFO hand-off between the input thread and the writer.
//! - [`dispatcher`] handles inbound messages: prints text, answers pings and
//!   follows the close handshake.
//! - [`pump`] runs the writer and the dispatcher side by side and decides when
//!   the session is over.
//!
//! Integration tests drive [`pump::Pump`] over in-memory connections and over
//! real websocket streams.

pub mod cli;
pub mod dispatcher;
pub mod frame;
pub mod input;
pub mod pump;
pub mod queue;
