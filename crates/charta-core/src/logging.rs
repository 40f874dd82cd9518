//! Structured logging field name constants for charta.
//!
//! All crates use these constants for consistent structured logging
//! fields, so log aggregation tools can query by standardized names
//! across every subsystem. Field values must never contain PHI: no note
//! content, no patient names, no MRNs. Entity UUIDs are fine.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, request still succeeded |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, skipped derivations, config choices |
//! | TRACE | Per-item iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated across a request. Format: UUIDv7.
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "db", "storage"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "notes", "patients", "blob_store", "soap"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "ingest", "list", "soft_delete", "put"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Patient UUID being operated on.
pub const PATIENT_ID: &str = "patient_id";

/// Note UUID being operated on.
pub const NOTE_ID: &str = "note_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of items returned by a listing.
pub const RESULT_COUNT: &str = "result_count";

/// Byte size of a stored or fetched blob.
pub const BLOB_SIZE: &str = "blob_size";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
