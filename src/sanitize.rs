//! Field sanitization and validation applied before anything is persisted.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;

pub const MAX_SUBJECT_LEN: usize = 255;
pub const MAX_SENDER_LEN: usize = 255;
pub const MAX_BODY_LEN: usize = 5000;

/// Loose `local@domain.tld` shape. Anchored at the start only, so trailing
/// text after a valid prefix is accepted.
static SENDER_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@]+@[^@]+\.[^@]+").expect("sender regex is valid"));

/// Drop every character outside printable ASCII (0x20..=0x7E), then trim.
pub fn sanitize(input: &str) -> String {
    let kept: String = input.chars().filter(|c| matches!(c, ' '..='~')).collect();
    kept.trim().to_string()
}

/// Check already-sanitized fields against the length and shape limits.
pub fn validate(subject: &str, sender: &str, body: &str) -> Result<(), ValidationError> {
    if subject.is_empty() || subject.chars().count() > MAX_SUBJECT_LEN {
        return Err(ValidationError::Subject(
            "Subject is either empty or too long.".into(),
        ));
    }
    if sender.is_empty()
        || sender.chars().count() > MAX_SENDER_LEN
        || !SENDER_SHAPE.is_match(sender)
    {
        return Err(ValidationError::Sender(
            "Sender is either empty, too long, or not a valid email address.".into(),
        ));
    }
    if body.is_empty() || body.chars().count() > MAX_BODY_LEN {
        return Err(ValidationError::Body(
            "Email content is either empty or too long.".into(),
        ));
    }
    Ok(())
}
