//! Schema for the `emails` table, created on first use.

use libsql::Connection;


pub(crate) const CREATE_EMAILS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS emails (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        subject TEXT NOT NULL,
        sender TEXT NOT NULL,
        body TEXT NOT NULL,
        processed BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Create the `emails` table if it is absent. Safe to call on every save.
///
/// This is the first statement sent on a fresh connection, so for a remote
/// target it is also where an unreachable server shows up.
pub(crate) async fn ensure_schema(conn: &Connection) -> Result<(), libsql::Error> {
    conn.execute_batch(CREATE_EMAILS_TABLE).await?;
    Ok(())
}
