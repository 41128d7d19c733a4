//! Minimal IMAP4rev1 client: LOGIN, SELECT, SEARCH UNSEEN, FETCH RFC822, LOGOUT.
//!
//! Runs over any blocking `Read + Write` stream. Message bodies are read
//! from the `{size}` literal byte-exactly.

use std::io::{BufRead, BufReader, Read, Write};

use tracing::{debug, info};

use crate::error::MailError;
use crate::mail::{FetchSummary, OnMessage, RawMessage};

/// Largest `{n}` literal accepted from the server.
pub const MAX_LITERAL_BYTES: usize = 64 * 1024 * 1024;

/// Fetch every unseen message in `inbox`, handing each to `on_message`.
///
/// The server flags each fetched message `\Seen` on its own; nothing is
/// stored or expunged explicitly.
pub fn fetch_unseen<S>(
    stream: &mut S,
    username: &str,
    password: &str,
    on_message: &mut OnMessage<'_>,
) -> Result<FetchSummary, MailError>
where
    S: Read + Write + ?Sized,
{
    let mut session = ImapSession::new(stream);
    session.greeting()?;
    session.login(username, password)?;
    session.select("inbox")?;

    let ids = session.search_unseen()?;
    info!("Found {} new emails", ids.len());

    let mut summary = FetchSummary {
        found: ids.len(),
        retrieved: 0,
    };

    for id in &ids {
        info!("Fetching email-id: {id}");
        let bytes = session.fetch_rfc822(id)?;
        summary.retrieved += 1;
        let flow = on_message(RawMessage {
            label: id.clone(),
            bytes,
        });
        if flow.is_break() {
            debug!("Batch stopped after email-id {id}");
            break;
        }
    }

    if let Err(e) = session.logout() {
        debug!("IMAP logout failed: {e}");
    }
    Ok(summary)
}

/// One response line with any literals it carried, in order.
#[derive(Debug, Default)]
struct ResponseLine {
    text: String,
    literals: Vec<Vec<u8>>,
}

struct ImapSession<'a, S: Read + Write + ?Sized> {
    stream: BufReader<&'a mut S>,
    next_tag: u32,
}

impl<'a, S: Read + Write + ?Sized> ImapSession<'a, S> {
    fn new(stream: &'a mut S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        }
    }

    fn greeting(&mut self) -> Result<(), MailError> {
        let line = self.read_response_line()?;
        if line.text.starts_with("* OK") || line.text.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(MailError::Protocol(format!(
                "unexpected greeting: {}",
                line.text.trim_end()
            )))
        }
    }

    fn login(&mut self, username: &str, password: &str) -> Result<(), MailError> {
        let cmd = format!("LOGIN {} {}", quote(username), quote(password));
        match self.command(&cmd, "LOGIN") {
            Err(MailError::Command { response, .. }) => Err(MailError::Auth(response)),
            other => other.map(|_| ()),
        }
    }

    fn select(&mut self, mailbox: &str) -> Result<(), MailError> {
        let cmd = format!("SELECT {}", quote(mailbox));
        self.command(&cmd, "SELECT").map(|_| ())
    }

    fn search_unseen(&mut self) -> Result<Vec<String>, MailError> {
        let lines = self.command("SEARCH UNSEEN", "SEARCH")?;
        let ids = lines
            .iter()
            .filter_map(|line| line.text.strip_prefix("* SEARCH"))
            .flat_map(|rest| rest.split_whitespace())
            .filter(|id| id.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
            .collect();
        Ok(ids)
    }

    fn fetch_rfc822(&mut self, id: &str) -> Result<Vec<u8>, MailError> {
        let cmd = format!("FETCH {id} (RFC822)");
        let lines = self.command(&cmd, "FETCH")?;
        lines
            .into_iter()
            .filter(|line| line.text.contains("FETCH"))
            .find_map(|line| line.literals.into_iter().next())
            .ok_or_else(|| MailError::Protocol(format!("no RFC822 literal for email-id {id}")))
    }

    fn logout(&mut self) -> Result<(), MailError> {
        self.command("LOGOUT", "LOGOUT").map(|_| ())
    }

    /// Send a tagged command and collect untagged lines up to its completion.
    ///
    /// `name` is what appears in errors, so credentials never leak there.
    fn command(&mut self, cmd: &str, name: &str) -> Result<Vec<ResponseLine>, MailError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let writer = self.stream.get_mut();
        writer.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        writer.flush()?;

        let prefix = format!("{tag} ");
        let mut untagged = Vec::new();
        loop {
            let line = self.read_response_line()?;
            if let Some(status) = line.text.strip_prefix(&prefix) {
                let status = status.trim_end();
                if status.starts_with("OK") {
                    return Ok(untagged);
                }
                return Err(MailError::Command {
                    command: name.to_string(),
                    response: status.to_string(),
                });
            }
            untagged.push(line);
        }
    }

    /// Read one logical response line, pulling in `{n}` literals as they appear.
    fn read_response_line(&mut self) -> Result<ResponseLine, MailError> {
        let mut line = ResponseLine::default();
        loop {
            let mut buf = Vec::new();
            if self.stream.read_until(b'\n', &mut buf)? == 0 {
                return Err(MailError::ConnectionClosed);
            }
            let chunk = String::from_utf8_lossy(&buf);
            let chunk = chunk.trim_end_matches(['\r', '\n']);
            line.text.push_str(chunk);

            match literal_size(chunk) {
                Some(size) if size > MAX_LITERAL_BYTES => {
                    return Err(MailError::Protocol(format!(
                        "literal of {size} bytes exceeds the {MAX_LITERAL_BYTES} byte limit"
                    )));
                }
                Some(size) => {
                    let mut literal = vec![0u8; size];
                    self.stream.read_exact(&mut literal)?;
                    line.literals.push(literal);
                }
                None => return Ok(line),
            }
        }
    }
}

/// Size of a trailing `{n}` literal marker, if present.
fn literal_size(chunk: &str) -> Option<usize> {
    let inner = chunk.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
