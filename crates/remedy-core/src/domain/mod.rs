//! Domain models for the remediation pipeline.
//!
//! Canonical definitions for the entities that flow through a run:
//! - `Alert`: upstream event, immutable once received
//! - `Classification`: category + targets derived from an alert
//! - `RetrievedCase`: similar historical remediation
//! - `ContentDigest`: SHA-256 of staged and audited bytes

pub mod alert;
pub mod case;
pub mod classification;
pub mod digest;
pub mod error;

pub use alert::{Alert, Severity};
pub use case::RetrievedCase;
pub use classification::{Category, Classification, UNKNOWN_TARGET};
pub use digest::ContentDigest;
pub use error::{RemedyError, Result};
