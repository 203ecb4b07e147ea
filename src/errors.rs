/*!
 * Error types for the lexistore engine.
 *
 * Structural and connectivity failures surface as `DatabaseError` values.
 * A cache miss is not an error: lookups return `Ok(None)` instead.
 */

use thiserror::Error;

/// Errors that can occur when working with the persistence engine
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The engine was used before `ensure_initialized` completed
    #[error("Database has not been initialized")]
    Uninitialized,

    /// Backend unreachable or misconfigured
    #[error("Connection error: {0}")]
    Connection(String),

    /// An insert, update or delete failed and was rolled back
    #[error("Write failed: {0}")]
    Write(String),

    /// A lookup or search query failed
    #[error("Read failed: {0}")]
    Read(String),

    /// A schema step failed in a way that blocks startup
    #[error("Schema error: {0}")]
    Migration(String),

    /// The payload handed to a write operation is structurally invalid
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DatabaseError {
    /// Wrap an internal failure as a write error, keeping the context chain
    pub fn write(error: anyhow::Error) -> Self {
        Self::Write(format!("{:#}", error))
    }

    /// Wrap an internal failure as a read error, keeping the context chain
    pub fn read(error: anyhow::Error) -> Self {
        Self::Read(format!("{:#}", error))
    }

    /// Wrap a connection failure, keeping the context chain
    pub fn connection(error: anyhow::Error) -> Self {
        Self::Connection(format!("{:#}", error))
    }
}

/// Result type for engine operations
pub type DbResult<T> = Result<T, DatabaseError>;
