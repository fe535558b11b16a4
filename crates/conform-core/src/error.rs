//! Error types for the conformance core
//!
//! Resolution failures abort a topic, decompression failures become
//! `blob` findings, and validation failures become `message` or `schema`
//! findings. Running out of budget is not an error and has no type here.

use thiserror::Error;

use crate::findings::{ErrorDetail, FindingKind};
use crate::store::StoreError;

/// A `$ref` pointer could not be expanded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// The referenced schema or definition does not exist
    #[error("Reference could not be found: {0}")]
    NotFound(String),

    /// The fetched schema declares a different `$id`
    #[error("ID of reference is {requested} while that of the schema is {declared}")]
    IdMismatch { requested: String, declared: String },

    /// The fetched schema declares no `$id` at all
    #[error("Reference schema of reference {0} has no ID")]
    MissingId(String),

    /// The referenced definition is not an object
    #[error("Definition of reference {0} should be an object")]
    NotAnObject(String),

    /// The reference string has a shape we cannot interpret
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Nested references went deeper than the resolver allows
    #[error("References nest deeper than {0} levels")]
    DepthExceeded(usize),

    /// The schema source failed while fetching
    #[error("Schema source error: {0}")]
    Source(String),
}

impl From<StoreError> for ResolutionError {
    fn from(err: StoreError) -> Self {
        ResolutionError::Source(err.to_string())
    }
}

/// A blob could not be downloaded, decompressed or decoded
#[derive(Error, Debug)]
pub enum DecompressionError {
    /// The chunk download failed
    #[error("Download failed: {0}")]
    Download(#[from] StoreError),

    /// The xz stream is corrupt, truncated or over the memory limit
    #[error("Decompression failed: {0}")]
    Codec(String),

    /// The decompressed bytes are not UTF-8
    #[error("Invalid UTF-8 in decompressed data: {0}")]
    InvalidUtf8(String),

    /// Unparsed text kept growing across chunks
    #[error("Unparsed carry-over grew to {0} bytes")]
    CarryOverExceeded(usize),
}

impl From<xz2::stream::Error> for DecompressionError {
    fn from(err: xz2::stream::Error) -> Self {
        DecompressionError::Codec(err.to_string())
    }
}

/// Why one object did not pass its schema
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    /// The instance violates the schema
    #[error("Message does not conform to schema: {}", .0.message)]
    SchemaValidation(ErrorDetail),

    /// The schema itself is malformed
    #[error("Schema is malformed: {}", .0.message)]
    SchemaStructural(ErrorDetail),
}

impl ValidationFailure {
    /// Finding kind this failure is recorded as
    pub fn kind(&self) -> FindingKind {
        match self {
            ValidationFailure::SchemaValidation(_) => FindingKind::Message,
            ValidationFailure::SchemaStructural(_) => FindingKind::Schema,
        }
    }

    pub fn detail(&self) -> &ErrorDetail {
        match self {
            ValidationFailure::SchemaValidation(detail)
            | ValidationFailure::SchemaStructural(detail) => detail,
        }
    }

    pub fn into_detail(self) -> ErrorDetail {
        match self {
            ValidationFailure::SchemaValidation(detail)
            | ValidationFailure::SchemaStructural(detail) => detail,
        }
    }
}
