//! mail-ingest: poll a mailbox over IMAP or POP3 and store plain-text messages.

pub mod config;
pub mod error;
pub mod mail;
pub mod poller;
pub mod sanitize;
pub mod store;
