//! Minimal POP3 client: USER, PASS, LIST, RETR, QUIT.
//!
//! POP3 has no seen flag. Every message left on the server is retrieved
//! again on every cycle.

use std::io::{BufRead, BufReader, Read, Write};

use tracing::{debug, info};

use crate::error::MailError;
use crate::mail::{FetchSummary, OnMessage, RawMessage};

/// Retrieve every message currently on the server, by sequential index.
pub fn fetch_all<S>(
    stream: &mut S,
    username: &str,
    password: &str,
    on_message: &mut OnMessage<'_>,
) -> Result<FetchSummary, MailError>
where
    S: Read + Write + ?Sized,
{
    let mut session = Pop3Session::new(stream);
    session.greeting()?;
    session.authenticate(username, password)?;

    let count = session.list()?;
    info!("Found {count} new emails");

    let mut summary = FetchSummary {
        found: count,
        retrieved: 0,
    };

    for index in 1..=count {
        let label = format!("{index}/{count}");
        info!("Fetching email-id: {label}");
        let bytes = session.retr(index)?;
        summary.retrieved += 1;
        if on_message(RawMessage { label, bytes }).is_break() {
            debug!("Batch stopped after message {index}/{count}");
            break;
        }
    }

    if let Err(e) = session.quit() {
        debug!("POP3 quit failed: {e}");
    }
    Ok(summary)
}

struct Pop3Session<'a, S: Read + Write + ?Sized> {
    stream: BufReader<&'a mut S>,
}

impl<'a, S: Read + Write + ?Sized> Pop3Session<'a, S> {
    fn new(stream: &'a mut S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    fn greeting(&mut self) -> Result<(), MailError> {
        let line = self.read_line()?;
        status(&line, "greeting").map(|_| ())
    }

    fn authenticate(&mut self, username: &str, password: &str) -> Result<(), MailError> {
        let auth_err = |e: MailError| match e {
            MailError::Command { response, .. } => MailError::Auth(response),
            other => other,
        };
        self.command(&format!("USER {username}"), "USER")
            .map_err(auth_err)?;
        self.command(&format!("PASS {password}"), "PASS")
            .map_err(auth_err)?;
        Ok(())
    }

    /// Number of messages in the drop, counted from the scan listing.
    fn list(&mut self) -> Result<usize, MailError> {
        self.command("LIST", "LIST")?;
        let listing = self.read_multiline()?;
        Ok(listing
            .iter()
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .count())
    }

    fn retr(&mut self, index: usize) -> Result<Vec<u8>, MailError> {
        self.command(&format!("RETR {index}"), "RETR")?;
        let lines = self.read_multiline()?;
        Ok(lines.join(&b"\r\n"[..]))
    }

    fn quit(&mut self) -> Result<(), MailError> {
        self.command("QUIT", "QUIT").map(|_| ())
    }

    fn command(&mut self, cmd: &str, name: &str) -> Result<String, MailError> {
        let writer = self.stream.get_mut();
        writer.write_all(format!("{cmd}\r\n").as_bytes())?;
        writer.flush()?;
        let line = self.read_line()?;
        status(&line, name)
    }

    fn read_line(&mut self) -> Result<String, MailError> {
        let raw = self.read_raw_line()?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// One line without its terminator.
    fn read_raw_line(&mut self) -> Result<Vec<u8>, MailError> {
        let mut buf = Vec::new();
        if self.stream.read_until(b'\n', &mut buf)? == 0 {
            return Err(MailError::ConnectionClosed);
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(buf)
    }

    /// Lines of a multi-line response up to the lone `.`, dot-unstuffed.
    fn read_multiline(&mut self) -> Result<Vec<Vec<u8>>, MailError> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_raw_line()?;
            if line == b"." {
                return Ok(lines);
            }
            match line.strip_prefix(b".") {
                Some(rest) => lines.push(rest.to_vec()),
                None => lines.push(line),
            }
        }
    }
}

/// Split a status line into its `+OK` text, or a command error for `-ERR`.
fn status(line: &str, name: &str) -> Result<String, MailError> {
    if let Some(rest) = line.strip_prefix("+OK") {
        Ok(rest.trim().to_string())
    } else if let Some(rest) = line.strip_prefix("-ERR") {
        Err(MailError::Command {
            command: name.to_string(),
            response: rest.trim().to_string(),
        })
    } else {
        Err(MailError::Protocol(format!(
            "unexpected {name} response: {}",
            line.trim_end()
        )))
    }
}
