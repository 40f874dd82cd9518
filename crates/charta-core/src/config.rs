//! Environment-driven runtime configuration.
//!
//! Every setting comes from an environment variable with a sensible
//! default; only `DATABASE_URL` is required. The API binary loads `.env`
//! via dotenvy before reading these.

use crate::error::{Error, Result};

/// Default upload cap for note files (5 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// MIME types accepted for note file uploads by default.
pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] =
    &["text/plain", "application/pdf", "image/png", "image/jpeg"];

/// Runtime settings for the charta service.
#[derive(Debug, Clone)]
pub struct Settings {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Base directory for the filesystem blob store.
    pub storage_base_path: String,
    /// Maximum accepted note upload size in bytes.
    pub max_upload_bytes: u64,
    /// MIME allowlist for note uploads.
    pub allowed_mime_types: Vec<String>,
    /// Prefix for generated MRNs.
    pub mrn_prefix: String,
    /// Whether to generate an MRN when a patient is created without one.
    pub mrn_auto_generate: bool,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| Error::Config("DATABASE_URL must be set".to_string()))?;

        let max_upload_mb: u64 = env_or("CHARTA_MAX_UPLOAD_MB", "5")
            .parse()
            .map_err(|_| Error::Config("CHARTA_MAX_UPLOAD_MB must be an integer".to_string()))?;

        let allowed_mime_types = match std::env::var("CHARTA_ALLOWED_MIME_TYPES") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        Ok(Settings {
            database_url,
            bind_addr: env_or("CHARTA_BIND_ADDR", "0.0.0.0:3000"),
            storage_base_path: env_or("CHARTA_STORAGE_PATH", "./data/notes"),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            allowed_mime_types,
            mrn_prefix: env_or("CHARTA_MRN_PREFIX", "MRN-"),
            mrn_auto_generate: env_or("CHARTA_MRN_AUTO_GENERATE", "true") == "true",
        })
    }

    /// Whether the given MIME type is accepted for uploads.
    /// Comparison ignores case and any `;charset=` style parameters.
    pub fn is_mime_allowed(&self, mime_type: &str) -> bool {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        self.allowed_mime_types.contains(&essence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            database_url: "postgres://localhost/charta".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            storage_base_path: "/tmp/charta".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            mrn_prefix: "MRN-".to_string(),
            mrn_auto_generate: true,
        }
    }

    #[test]
    fn test_mime_allowlist_exact() {
        let s = settings();
        assert!(s.is_mime_allowed("text/plain"));
        assert!(!s.is_mime_allowed("application/zip"));
    }

    #[test]
    fn test_mime_allowlist_ignores_case_and_params() {
        let s = settings();
        assert!(s.is_mime_allowed("Text/Plain; charset=utf-8"));
        assert!(s.is_mime_allowed("APPLICATION/PDF"));
    }
}
