//! Persistence: the `emails` table and the sink that fills it.

pub mod libsql_backend;
pub mod schema;
pub mod traits;

pub use libsql_backend::EmailStore;
pub use traits::{EmailSink, SaveOutcome, StoredEmail};
