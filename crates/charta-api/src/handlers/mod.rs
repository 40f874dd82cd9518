//! Handler modules for charta-api.

pub mod notes;
pub mod patients;
