//! In-memory IMAP and POP3 servers for driving full poll cycles.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mail_ingest::config::IngestConfig;
use mail_ingest::error::MailError;
use mail_ingest::mail::{Connector, MailStream};

pub const USERNAME: &str = "inbox@example.com";
pub const PASSWORD: &str = "hunter2";

/// Server-side mailbox shared by every session a connector hands out.
#[derive(Debug, Default)]
pub struct Mailbox {
    messages: Vec<Vec<u8>>,
    seen: Vec<bool>,
}

impl Mailbox {
    pub fn with_messages(messages: &[&str]) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            messages: messages.iter().map(|m| m.as_bytes().to_vec()).collect(),
            seen: vec![false; messages.len()],
        }))
    }

    pub fn seen_count(&self) -> usize {
        self.seen.iter().filter(|s| **s).count()
    }
}

#[derive(Debug, Clone, Copy)]
enum Dialect {
    Imap,
    Pop3,
}

/// Connector that opens sessions against a shared `Mailbox`.
pub struct FakeConnector {
    dialect: Dialect,
    mailbox: Arc<Mutex<Mailbox>>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn imap(mailbox: Arc<Mutex<Mailbox>>) -> Self {
        Self {
            dialect: Dialect::Imap,
            mailbox,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn pop3(mailbox: Arc<Mutex<Mailbox>>) -> Self {
        Self {
            dialect: Dialect::Pop3,
            mailbox,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _host: &str, _port: u16) -> Result<Box<dyn MailStream>, MailError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession::new(
            self.dialect,
            Arc::clone(&self.mailbox),
        )))
    }
}

/// One server connection. Responses are produced as soon as a full
/// command line has been written.
struct FakeSession {
    dialect: Dialect,
    mailbox: Arc<Mutex<Mailbox>>,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    authenticated: bool,
    pop_user: Option<String>,
}

impl FakeSession {
    fn new(dialect: Dialect, mailbox: Arc<Mutex<Mailbox>>) -> Self {
        let greeting = match dialect {
            Dialect::Imap => "* OK fake IMAP4rev1 ready\r\n",
            Dialect::Pop3 => "+OK fake POP3 ready\r\n",
        };
        Self {
            dialect,
            mailbox,
            inbound: Vec::new(),
            outbound: greeting.bytes().collect(),
            authenticated: false,
            pop_user: None,
        }
    }

    fn reply(&mut self, bytes: &[u8]) {
        self.outbound.extend(bytes.iter().copied());
    }

    fn handle_line(&mut self, line: &str) {
        match self.dialect {
            Dialect::Imap => self.handle_imap(line),
            Dialect::Pop3 => self.handle_pop3(line),
        }
    }

    fn handle_imap(&mut self, line: &str) {
        let (tag, rest) = line.split_once(' ').unwrap_or((line, ""));
        let (verb, args) = rest.split_once(' ').unwrap_or((rest, ""));

        match verb {
            "LOGIN" => {
                let expected = format!("\"{USERNAME}\" \"{PASSWORD}\"");
                if args == expected {
                    self.authenticated = true;
                    self.reply(format!("{tag} OK LOGIN completed\r\n").as_bytes());
                } else {
                    self.reply(format!("{tag} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n").as_bytes());
                }
            }
            "SELECT" if self.authenticated => {
                let total = self.mailbox.lock().unwrap().messages.len();
                self.reply(format!("* {total} EXISTS\r\n{tag} OK [READ-WRITE] SELECT completed\r\n").as_bytes());
            }
            "SEARCH" if self.authenticated => {
                let ids: Vec<String> = {
                    let mailbox = self.mailbox.lock().unwrap();
                    mailbox
                        .seen
                        .iter()
                        .enumerate()
                        .filter(|(_, seen)| !**seen)
                        .map(|(i, _)| (i + 1).to_string())
                        .collect()
                };
                let mut search = String::from("* SEARCH");
                for id in &ids {
                    search.push(' ');
                    search.push_str(id);
                }
                self.reply(format!("{search}\r\n{tag} OK SEARCH completed\r\n").as_bytes());
            }
            "FETCH" if self.authenticated => {
                let id: usize = args
                    .split_whitespace()
                    .next()
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(0);
                let body = {
                    let mut mailbox = self.mailbox.lock().unwrap();
                    match mailbox.messages.get(id.wrapping_sub(1)).cloned() {
                        Some(body) => {
                            mailbox.seen[id - 1] = true;
                            Some(body)
                        }
                        None => None,
                    }
                };
                match body {
                    Some(body) => {
                        self.reply(format!("* {id} FETCH (RFC822 {{{}}}\r\n", body.len()).as_bytes());
                        self.reply(&body);
                        self.reply(format!(")\r\n{tag} OK FETCH completed\r\n").as_bytes());
                    }
                    None => self.reply(format!("{tag} BAD no such message\r\n").as_bytes()),
                }
            }
            "LOGOUT" => {
                self.reply(format!("* BYE logging out\r\n{tag} OK LOGOUT completed\r\n").as_bytes());
            }
            _ => self.reply(format!("{tag} BAD unexpected command\r\n").as_bytes()),
        }
    }

    fn handle_pop3(&mut self, line: &str) {
        let (verb, arg) = line.split_once(' ').unwrap_or((line, ""));

        match verb {
            "USER" => {
                self.pop_user = Some(arg.to_string());
                self.reply(b"+OK\r\n");
            }
            "PASS" => {
                if self.pop_user.as_deref() == Some(USERNAME) && arg == PASSWORD {
                    self.authenticated = true;
                    self.reply(b"+OK maildrop locked\r\n");
                } else {
                    self.reply(b"-ERR [AUTH] invalid password\r\n");
                }
            }
            "LIST" if self.authenticated => {
                let sizes: Vec<usize> = {
                    let mailbox = self.mailbox.lock().unwrap();
                    mailbox.messages.iter().map(Vec::len).collect()
                };
                let mut listing = format!("+OK {} messages\r\n", sizes.len());
                for (i, size) in sizes.iter().enumerate() {
                    listing.push_str(&format!("{} {size}\r\n", i + 1));
                }
                listing.push_str(".\r\n");
                self.reply(listing.as_bytes());
            }
            "RETR" if self.authenticated => {
                let index: usize = arg.trim().parse().unwrap_or(0);
                let body = self
                    .mailbox
                    .lock()
                    .unwrap()
                    .messages
                    .get(index.wrapping_sub(1))
                    .cloned();
                match body {
                    Some(body) => {
                        self.reply(b"+OK message follows\r\n");
                        let stuffed = dot_stuff(&body);
                        self.reply(&stuffed);
                        self.reply(b"\r\n.\r\n");
                    }
                    None => self.reply(b"-ERR no such message\r\n"),
                }
            }
            "QUIT" => self.reply(b"+OK bye\r\n"),
            _ => self.reply(b"-ERR unexpected command\r\n"),
        }
    }
}

fn dot_stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    for (i, line) in body.split(|b| *b == b'\n').enumerate() {
        if i > 0 {
            out.push(b'\n');
        }
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
    }
    out
}

impl Read for FakeSession {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for FakeSession {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inbound.extend_from_slice(buf);
        while let Some(end) = self.inbound.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = self.inbound.drain(..end + 2).collect();
            let line = String::from_utf8_lossy(&line[..end]).into_owned();
            self.handle_line(&line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Config pointing at the fake servers, with `overrides` applied on top.
pub fn config(overrides: &[(&str, &str)]) -> IngestConfig {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("MAIL_USERNAME".to_string(), USERNAME.to_string()),
        ("MAIL_PASSWORD".to_string(), PASSWORD.to_string()),
        ("IMAP_HOST".to_string(), "imap.test".to_string()),
        ("POP_HOST".to_string(), "pop.test".to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    IngestConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}
