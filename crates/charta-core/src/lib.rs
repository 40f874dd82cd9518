//! # charta-core
//!
//! Core types, traits, and abstractions for the charta patient record
//! service.
//!
//! This crate provides the foundational data structures and trait
//! definitions that other charta crates depend on: the patient and note
//! domain models, the deterministic SOAP section parser, the opaque
//! pagination cursor codec, and the shared error type.

pub mod config;
pub mod cursor;
pub mod error;
pub mod logging;
pub mod models;
pub mod mrn;
pub mod soap;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::Settings;
pub use cursor::{
    decode_note_cursor, decode_patient_cursor, encode_note_cursor, encode_patient_cursor,
    CursorError, NoteCursor, PatientCursor, PatientSortKey, SortOrder, CURSOR_VERSION,
};
pub use error::{Error, Result};
pub use models::{
    validate_date_of_birth, FileReference, Note, NoteContent, NoteDraft, NoteLifecycle, Patient, SoapDocument,
    ValidatedNote, ValidationError, CHECKSUM_HEX_LEN, MAX_NOTE_TYPE_LEN,
};
pub use mrn::{generate_mrn, normalize_mrn, MAX_MRN_LEN};
pub use soap::{parse_soap, SoapParse, SoapSections, SOAP_PARSER_VERSION, SOAP_SCHEMA};
pub use traits::*;
