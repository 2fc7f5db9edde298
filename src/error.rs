use thiserror::Error;

use crate::validate::{
    CompilerError, ERR_BACKEND, ERR_CONFIG, ERR_IO, ERR_PARSE, INV_MISSING_MARKER,
    INV_UNRESOLVED_IMPORT,
};

/// Failure reported by a [`Backend`](crate::backend::Backend).
///
/// `item` indexes into the merged package so the adapter can blame the
/// file that contributed the failing declaration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendFailure {
    pub message: String,
    pub item: Option<usize>,
    pub transient: bool,
}

impl BackendFailure {
    pub fn new(message: impl Into<String>) -> Self {
        BackendFailure {
            message: message.into(),
            item: None,
            transient: false,
        }
    }

    pub fn at_item(mut self, index: usize) -> Self {
        self.item = Some(index);
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

#[derive(Error, Debug)]
pub enum ClassfileError {
    #[error("missing marker: {0}")]
    MissingMarker(CompilerError),

    #[error("invalid classfile: {0}")]
    InvalidClassfile(CompilerError),

    #[error("unresolved import: {0}")]
    UnresolvedImport(CompilerError),

    #[error("parse error: {0}")]
    Parse(CompilerError),

    #[error("backend error in {path}: {failure}")]
    Backend {
        path: String,
        #[source]
        failure: BackendFailure,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClassfileError>;

impl ClassfileError {
    /// Classifies a validator diagnostic by its invariant code.
    pub fn from_diagnostic(diagnostic: CompilerError) -> Self {
        match diagnostic.code.as_str() {
            INV_MISSING_MARKER => ClassfileError::MissingMarker(diagnostic),
            INV_UNRESOLVED_IMPORT => ClassfileError::UnresolvedImport(diagnostic),
            ERR_PARSE => ClassfileError::Parse(diagnostic),
            _ => ClassfileError::InvalidClassfile(diagnostic),
        }
    }

    pub fn diagnostic(&self) -> Option<&CompilerError> {
        match self {
            ClassfileError::MissingMarker(d)
            | ClassfileError::InvalidClassfile(d)
            | ClassfileError::UnresolvedImport(d)
            | ClassfileError::Parse(d) => Some(d),
            _ => None,
        }
    }

    /// Flattens any error into the serializable diagnostic shape.
    pub fn to_diagnostic(&self) -> CompilerError {
        match self {
            ClassfileError::MissingMarker(d)
            | ClassfileError::InvalidClassfile(d)
            | ClassfileError::UnresolvedImport(d)
            | ClassfileError::Parse(d) => d.clone(),
            ClassfileError::Backend { path, failure } => {
                CompilerError::new(ERR_BACKEND, &failure.message, path, 0, 0)
            }
            ClassfileError::Io { path, source } => {
                CompilerError::new(ERR_IO, &source.to_string(), path, 0, 0)
            }
            ClassfileError::Config(e) => CompilerError::new(
                ERR_CONFIG,
                &e.to_string(),
                "<options>",
                e.line() as u32,
                e.column() as u32,
            ),
        }
    }

    /// File the error is attributed to, when there is one.
    pub fn path(&self) -> Option<&str> {
        match self {
            ClassfileError::Backend { path, .. } | ClassfileError::Io { path, .. } => Some(path),
            ClassfileError::Config(_) => None,
            _ => self.diagnostic().map(|d| d.file.as_str()),
        }
    }

    /// Validation failures are deterministic; only a backend that flagged
    /// its failure as transient is worth re-invoking.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClassfileError::Backend { failure, .. } if failure.transient)
    }
}
