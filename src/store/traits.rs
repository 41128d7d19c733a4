//! The `EmailSink` seam between the poller and persistence.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::{DatabaseError, ValidationError};
use crate::mail::NormalizedMessage;

/// What happened to one candidate handed to a sink.
#[derive(Debug)]
pub enum SaveOutcome {
    /// Persisted with the given surrogate key.
    Stored { id: i64 },
    /// Dropped before touching storage.
    Rejected(ValidationError),
    /// Insert or commit failed and was rolled back; the batch carries on.
    Failed(DatabaseError),
}

/// A row of the `emails` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEmail {
    pub id: i64,
    pub subject: String,
    pub sender: String,
    pub body: String,
    pub processed: bool,
    /// Server-side `CURRENT_TIMESTAMP`, UTC.
    pub created_at: NaiveDateTime,
}

/// Receives normalized messages one at a time.
///
/// `Err` is reserved for failing to reach storage at all; per-message
/// problems come back as a `SaveOutcome`.
#[async_trait]
pub trait EmailSink: Send + Sync {
    async fn save(&self, message: NormalizedMessage) -> Result<SaveOutcome, DatabaseError>;
}
