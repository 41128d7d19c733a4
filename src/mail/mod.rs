//! Mailbox access: transport, protocol sessions, and MIME decoding.

pub mod decoder;
pub mod imap;
pub mod pop3;
pub mod tls;

use std::io::{Read, Write};
use std::ops::ControlFlow;

use crate::error::MailError;

pub use decoder::{DecodedMessage, DecoderOptions, SenderDecoding, decode};
pub use tls::TlsConnector;

/// Bytes fetched from the server for one message identifier.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Sequence number (IMAP) or `i/n` index (POP3), for logging.
    pub label: String,
    pub bytes: Vec<u8>,
}

/// One plain-text candidate ready to be handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub subject: String,
    pub sender: String,
    pub body: String,
}

/// Counts reported by a protocol session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Messages the server reported as available.
    pub found: usize,
    /// Messages actually retrieved and handed to the callback.
    pub retrieved: usize,
}

/// A connected, bidirectional byte stream to a mail server.
pub trait MailStream: Read + Write + Send {}

impl<T: Read + Write + Send> MailStream for T {}

/// Opens mail server connections. One connection per poll cycle.
pub trait Connector: Send + Sync {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn MailStream>, MailError>;
}

/// Callback invoked with each retrieved message. `Break` ends the batch.
pub type OnMessage<'a> = dyn FnMut(RawMessage) -> ControlFlow<()> + 'a;
