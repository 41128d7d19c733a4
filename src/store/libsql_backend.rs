//! libSQL-backed `EmailSink`.
//!
//! Every `save` opens its own database handle and connection and drops
//! them when done. Nothing is pooled across calls.

use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use libsql::{Connection, Database, params};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error, info, warn};

use crate::config::{DatabaseConfig, DatabaseTarget};
use crate::error::DatabaseError;
use crate::mail::NormalizedMessage;
use crate::sanitize::{sanitize, validate};
use crate::store::schema::ensure_schema;
use crate::store::traits::{EmailSink, SaveOutcome, StoredEmail};

/// Persists normalized messages into the `emails` table.
pub struct EmailStore {
    target: DatabaseTarget,
    user: String,
    auth_token: SecretString,
}

/// A database handle paired with its connection so both drop together.
struct Session {
    _db: Database,
    conn: Connection,
}

impl EmailStore {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            target: config.target(),
            user: config.user.clone(),
            auth_token: config.password.clone(),
        }
    }

    /// Store writing to a local file, bypassing env-derived settings.
    pub fn local(path: impl AsRef<Path>) -> Self {
        Self {
            target: DatabaseTarget::Local(path.as_ref().to_path_buf()),
            user: String::new(),
            auth_token: SecretString::from(String::new()),
        }
    }

    pub fn target(&self) -> &DatabaseTarget {
        &self.target
    }

    async fn open(&self) -> Result<Session, DatabaseError> {
        let db = match &self.target {
            DatabaseTarget::Local(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        DatabaseError::Connection(format!(
                            "failed to create database directory {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
                libsql::Builder::new_local(path).build().await
            }
            DatabaseTarget::Remote { url } => {
                debug!(url = %url, user = %self.user, "Connecting to remote database");
                libsql::Builder::new_remote(
                    url.clone(),
                    self.auth_token.expose_secret().to_string(),
                )
                .build()
                .await
            }
        }
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        ensure_schema(&conn)
            .await
            .map_err(|e| DatabaseError::Connection(format!("create emails table: {e}")))?;

        Ok(Session { _db: db, conn })
    }

    /// Most recent `limit` rows, oldest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<StoredEmail>, DatabaseError> {
        let session = self.open().await?;
        let conn = &session.conn;

        let mut rows = conn
            .query(
                "SELECT id, subject, sender, body, processed, created_at
                 FROM emails ORDER BY id DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent: {e}")))?;

        let mut emails = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("recent: {e}")))?
        {
            emails.push(row_to_email(&row)?);
        }
        emails.reverse();
        Ok(emails)
    }
}

#[async_trait]
impl EmailSink for EmailStore {
    async fn save(&self, message: NormalizedMessage) -> Result<SaveOutcome, DatabaseError> {
        let subject = sanitize(&message.subject);
        let sender = sanitize(&message.sender);
        let body = sanitize(&message.body);

        if let Err(e) = validate(&subject, &sender, &body) {
            warn!(sender = %sender, "Validation error: {e}");
            return Ok(SaveOutcome::Rejected(e));
        }

        let session = match self.open().await {
            Ok(session) => session,
            Err(e) => {
                error!("{e}");
                return Err(e);
            }
        };

        match insert_email(&session.conn, &subject, &sender, &body).await {
            Ok(id) => {
                info!(id, "Email saved: Subject: {subject}, Sender: {sender}");
                Ok(SaveOutcome::Stored { id })
            }
            Err(e) => {
                error!(sender = %sender, "Database error: {e}");
                Ok(SaveOutcome::Failed(e))
            }
        }
    }
}

/// Insert one row inside a transaction.
async fn insert_email(
    conn: &Connection,
    subject: &str,
    sender: &str,
    body: &str,
) -> Result<i64, DatabaseError> {
    let tx = conn
        .transaction()
        .await
        .map_err(|e| DatabaseError::Transaction(format!("begin: {e}")))?;

    if let Err(e) = tx
        .execute(
            "INSERT INTO emails (subject, sender, body, processed) VALUES (?1, ?2, ?3, FALSE)",
            params![subject, sender, body],
        )
        .await
    {
        if let Err(rollback) = tx.rollback().await {
            warn!("Rollback failed: {rollback}");
        }
        return Err(DatabaseError::Query(format!("insert email: {e}")));
    }

    let id = tx.last_insert_rowid();

    if let Err(e) = tx.commit().await {
        if let Err(rollback) = conn.execute("ROLLBACK", ()).await {
            debug!("Rollback after failed commit: {rollback}");
        }
        return Err(DatabaseError::Transaction(format!("commit: {e}")));
    }

    Ok(id)
}

fn row_to_email(row: &libsql::Row) -> Result<StoredEmail, DatabaseError> {
    let column = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let created_raw: String = row.get(5).map_err(column)?;
    let created_at = NaiveDateTime::parse_from_str(&created_raw, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| DatabaseError::Query(format!("created_at {created_raw:?}: {e}")))?;

    Ok(StoredEmail {
        id: row.get(0).map_err(column)?,
        subject: row.get(1).map_err(column)?,
        sender: row.get(2).map_err(column)?,
        body: row.get(3).map_err(column)?,
        processed: row.get::<i64>(4).map_err(column)? != 0,
        created_at,
    })
}
