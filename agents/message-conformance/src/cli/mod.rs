//! Local checks
//!
//! Validates a message file (xz archive or plain JSON text) against a
//! schema file. External references are resolved from the schema's
//! directory with the same tag to file name mapping the schemas bucket
//! uses.

pub mod output;

pub use output::{CheckOutput, OutputFormat};

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use conform_core::decompress::decompress_all;
use conform_core::error::{DecompressionError, ResolutionError};
use conform_core::findings::BlobContext;
use conform_core::resolver::SchemaResolver;
use conform_core::store::DirSchemaSource;
use conform_core::validator::{check_text, MessageValidator};

/// Magic bytes opening every xz stream
const XZ_MAGIC: [u8; 6] = [0xFD, b'7', b'z', b'X', b'Z', 0x00];

/// Exit codes of the `check` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Every message conforms
    Success = 0,
    /// At least one problem was found
    Nonconforming = 1,
    /// The message file could not be read as text
    InvalidInput = 3,
    FileError = 4,
    /// The schema could not be parsed or resolved
    SchemaError = 5,
    InternalError = 10,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// CLI errors
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Could not read {path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid schema {path}: {message}")]
    Schema { path: PathBuf, message: String },

    #[error("Could not resolve schema references: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Could not read messages: {0}")]
    Messages(#[from] DecompressionError),

    #[error("Output error: {0}")]
    Output(String),
}

impl CliError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::File { .. } => ExitCode::FileError,
            CliError::Schema { .. } | CliError::Resolution(_) => ExitCode::SchemaError,
            CliError::Messages(_) => ExitCode::InvalidInput,
            CliError::Output(_) => ExitCode::InternalError,
        }
    }
}

/// Arguments of one check
#[derive(Debug, Clone)]
pub struct CheckArgs {
    pub schema: PathBuf,
    pub messages: PathBuf,
    /// Directory holding referenced schemas, the schema's own directory by default
    pub schema_dir: Option<PathBuf>,
    /// Topic name shown in findings
    pub topic: String,
}

impl CheckArgs {
    fn schema_dir(&self) -> PathBuf {
        self.schema_dir.clone().unwrap_or_else(|| {
            self.schema
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }
}

/// Parse a schema file, YAML by extension and JSON otherwise
pub fn parse_schema_file(path: &Path, bytes: &[u8]) -> Result<Value, CliError> {
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let parsed = if is_yaml {
        serde_yaml::from_slice::<Value>(bytes).map_err(|e| e.to_string())
    } else {
        serde_json::from_slice::<Value>(bytes).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| CliError::Schema {
        path: path.to_path_buf(),
        message,
    })
}

/// Message text of a file, decompressed when it is an xz archive
pub fn message_text(bytes: &[u8]) -> Result<String, CliError> {
    let raw = if bytes.starts_with(&XZ_MAGIC) {
        decompress_all(bytes)?
    } else {
        bytes.to_vec()
    };
    String::from_utf8(raw)
        .map_err(|e| CliError::Messages(DecompressionError::InvalidUtf8(e.utf8_error().to_string())))
}

async fn read(path: &Path) -> Result<Vec<u8>, CliError> {
    tokio::fs::read(path).await.map_err(|source| CliError::File {
        path: path.to_path_buf(),
        source,
    })
}

/// Validate the messages of one file
pub async fn check(args: &CheckArgs) -> Result<CheckOutput, CliError> {
    let schema = parse_schema_file(&args.schema, &read(&args.schema).await?)?;
    let resolver = SchemaResolver::new(Arc::new(DirSchemaSource::new(args.schema_dir())));
    let resolved = resolver.resolve(&schema).await?;
    let validator = MessageValidator::new(resolved);

    let text = message_text(&read(&args.messages).await?)?;

    let file_name = |path: &Path| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    };
    let context = BlobContext {
        schema_tag: file_name(&args.schema),
        topic_name: args.topic.clone(),
        history_bucket: args
            .messages
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        blob_full_name: file_name(&args.messages),
    };

    let report = check_text(&validator, &context, &text);
    tracing::debug!(
        messages = report.messages_checked,
        findings = report.findings.len(),
        "Checked message file"
    );
    Ok(CheckOutput::from_report(&report))
}

/// Exit code for a finished check
pub fn exit_code(output: &CheckOutput) -> ExitCode {
    if output.conforming {
        ExitCode::Success
    } else {
        ExitCode::Nonconforming
    }
}
