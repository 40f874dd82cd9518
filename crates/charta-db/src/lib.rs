//! # charta-db
//!
//! PostgreSQL persistence for the charta patient record service: the
//! connection pool, schema migrations, patient and note repositories,
//! and the filesystem blob store for uploaded note files.
//!
//! ## Architecture
//!
//! - **pool**: connection pool creation and health metrics
//! - **patients**: patient CRUD and keyset-paginated listing
//! - **notes**: note ingestion (with best-effort SOAP derivation) and reads
//! - **blob_store**: checksummed, atomically written file storage

pub mod blob_store;
pub mod notes;
pub mod patients;
pub mod pool;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

pub use blob_store::{compute_checksum, BlobStore, FilesystemStore, StoredBlob};
pub use notes::PgNoteRepository;
pub use patients::PgPatientRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

// Re-export core so API handlers need only one db-facing import.
pub use charta_core::*;

use sqlx::PgPool;
use tracing::info;

/// Escape LIKE pattern metacharacters in user-supplied filter text.
/// Queries binding the result must use `ESCAPE '\'`.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Aggregated database handle: pool plus repositories.
pub struct Database {
    pub pool: PgPool,
    pub patients: PgPatientRepository,
    pub notes: PgNoteRepository,
}

impl Database {
    /// Create a Database from an existing pool with default MRN settings.
    pub fn new(pool: PgPool) -> Self {
        Self {
            patients: PgPatientRepository::new(pool.clone()),
            notes: PgNoteRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a Database with explicit MRN generation settings.
    pub fn with_mrn_config(pool: PgPool, mrn_prefix: String, mrn_auto_generate: bool) -> Self {
        Self {
            patients: PgPatientRepository::new(pool.clone())
                .with_mrn_config(&mrn_prefix, mrn_auto_generate),
            notes: PgNoteRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect to PostgreSQL and run pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

/// Apply all pending schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!(
        subsystem = "db",
        component = "migrations",
        op = "run",
        "Running database migrations"
    );
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::Internal(format!("migration failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
        assert_eq!(escape_like("%_\\"), "\\%\\_\\\\");
    }
}
