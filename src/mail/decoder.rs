//! MIME decoding: raw blob → subject, sender, and a lazy run of text/plain bodies.

use std::borrow::Cow;

use mail_parser::decoders::base64::base64_decode;
use mail_parser::decoders::quoted_printable::quoted_printable_decode;
use mail_parser::{
    Encoding, HeaderName, Message, MessageParser, MessagePart, MimeHeaders, PartType,
};

use crate::config::MailConfig;
use crate::error::DecodeError;
use crate::mail::NormalizedMessage;

/// How the `From` header becomes the sender string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SenderDecoding {
    /// Header value as sent, encoded-words left alone.
    #[default]
    Raw,
    /// RFC 2047-decoded, rendered as `Name <addr>` or `addr`.
    Decoded,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecoderOptions {
    pub sender: SenderDecoding,
}

impl From<&MailConfig> for DecoderOptions {
    fn from(config: &MailConfig) -> Self {
        Self {
            sender: if config.decode_sender {
                SenderDecoding::Decoded
            } else {
                SenderDecoding::Raw
            },
        }
    }
}

/// A parsed message whose plain-text bodies have not been pulled yet.
pub struct DecodedMessage<'x> {
    pub subject: String,
    pub sender: String,
    message: Message<'x>,
}

impl std::fmt::Debug for DecodedMessage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedMessage")
            .field("subject", &self.subject)
            .field("sender", &self.sender)
            .field("parts", &self.message.parts.len())
            .finish()
    }
}

/// Parse one raw message and decode its headers.
pub fn decode<'x>(
    raw: &'x [u8],
    options: &DecoderOptions,
) -> Result<DecodedMessage<'x>, DecodeError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or(DecodeError::Unparseable)?;

    let subject = message
        .subject()
        .map(str::to_string)
        .ok_or(DecodeError::MissingHeader("Subject"))?;

    let sender = match options.sender {
        SenderDecoding::Raw => raw_sender(&message),
        SenderDecoding::Decoded => decoded_sender(&message).or_else(|| raw_sender(&message)),
    }
    .ok_or(DecodeError::MissingHeader("From"))?;

    Ok(DecodedMessage {
        subject,
        sender,
        message,
    })
}

impl<'x> DecodedMessage<'x> {
    pub fn is_multipart(&self) -> bool {
        matches!(
            self.message.parts.first().map(|p| &p.body),
            Some(PartType::Multipart(_))
        )
    }

    /// Consume the message, yielding one candidate per plain-text body.
    ///
    /// Multipart messages yield one item per `text/plain` part, including
    /// parts of attached `message/rfc822` messages; anything else yields
    /// exactly one item from the single payload. Payload decode failures
    /// come out in place, so earlier parts are unaffected.
    pub fn into_candidates(self) -> Candidates<'x> {
        let paths = if self.is_multipart() {
            let mut paths = Vec::new();
            collect_plain_parts(&self.message, &mut Vec::new(), &mut paths);
            paths
        } else {
            vec![vec![0]]
        };
        Candidates {
            subject: self.subject,
            sender: self.sender,
            message: self.message,
            paths: paths.into_iter(),
        }
    }
}

/// Record the location of every `text/plain` part, descending into
/// embedded messages. A path is a part index per nesting level.
fn collect_plain_parts(
    message: &Message<'_>,
    prefix: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    for (index, part) in message.parts.iter().enumerate() {
        prefix.push(index);
        match &part.body {
            PartType::Message(inner) => collect_plain_parts(inner, prefix, out),
            _ if is_text_plain(part) => out.push(prefix.clone()),
            _ => {}
        }
        prefix.pop();
    }
}

/// Finite, single-pass sequence of candidates from one message.
pub struct Candidates<'x> {
    subject: String,
    sender: String,
    message: Message<'x>,
    paths: std::vec::IntoIter<Vec<usize>>,
}

impl Iterator for Candidates<'_> {
    type Item = Result<NormalizedMessage, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        let (owner, part) = self.locate(&path)?;
        Some(payload_text(owner, part).map(|body| NormalizedMessage {
            subject: self.subject.clone(),
            sender: self.sender.clone(),
            body,
        }))
    }
}

impl<'x> Candidates<'x> {
    /// The part at `path` and the message whose raw bytes its offsets index.
    fn locate(&self, path: &[usize]) -> Option<(&Message<'x>, &MessagePart<'x>)> {
        let (last, outer) = path.split_last()?;
        let mut owner = &self.message;
        for &index in outer {
            match &owner.parts.get(index)?.body {
                PartType::Message(inner) => owner = inner,
                _ => return None,
            }
        }
        Some((owner, owner.parts.get(*last)?))
    }
}

/// `text/plain` exactly; a part without Content-Type defaults to it.
fn is_text_plain(part: &MessagePart<'_>) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case("plain"))
        }
        None => matches!(part.body, PartType::Text(_)),
    }
}

fn payload_text(owner: &Message<'_>, part: &MessagePart<'_>) -> Result<String, DecodeError> {
    if part.is_encoding_problem {
        return Err(DecodeError::Payload(
            "transfer encoding could not be decoded".into(),
        ));
    }
    match &part.body {
        PartType::Text(text) | PartType::Html(text) => {
            // mail-parser substitutes U+FFFD for bytes it cannot read.
            if text.contains(char::REPLACEMENT_CHARACTER) && reads_as_utf8(part) {
                check_utf8(owner, part)?;
            }
            Ok(text.to_string())
        }
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| DecodeError::Payload(e.to_string())),
        PartType::Message(_) | PartType::Multipart(_) => Err(DecodeError::Payload(
            "payload is a container, not text".into(),
        )),
    }
}

/// No declared charset, or UTF-8. Other charsets are decoded by mail-parser.
fn reads_as_utf8(part: &MessagePart<'_>) -> bool {
    match part.content_type().and_then(|ct| ct.attribute("charset")) {
        None => true,
        Some(charset) => {
            charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8")
        }
    }
}

/// Re-read the part's transfer-decoded bytes and require strict UTF-8.
fn check_utf8(owner: &Message<'_>, part: &MessagePart<'_>) -> Result<(), DecodeError> {
    let raw = owner
        .raw_message
        .get(part.offset_body as usize..part.offset_end as usize)
        .ok_or_else(|| DecodeError::Payload("part offsets outside message".into()))?;

    let bytes: Cow<'_, [u8]> = match part.encoding {
        Encoding::None => Cow::Borrowed(raw),
        Encoding::Base64 => Cow::Owned(
            base64_decode(raw).ok_or_else(|| DecodeError::Payload("invalid base64".into()))?,
        ),
        Encoding::QuotedPrintable => Cow::Owned(
            quoted_printable_decode(raw)
                .ok_or_else(|| DecodeError::Payload("invalid quoted-printable".into()))?,
        ),
    };

    std::str::from_utf8(&bytes)
        .map(|_| ())
        .map_err(|e| DecodeError::Payload(e.to_string()))
}

fn raw_sender(message: &Message<'_>) -> Option<String> {
    message
        .header_raw(HeaderName::From)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn decoded_sender(message: &Message<'_>) -> Option<String> {
    let addr = message.from().and_then(|addr| addr.first())?;
    let address = addr.address()?;
    Some(match addr.name() {
        Some(name) if !name.is_empty() => format!("{name} <{address}>"),
        _ => address.to_string(),
    })
}
