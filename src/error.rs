//! Crate-wide error type.
//!
//! Each layer (`page`, `record`, `btree`, `writer`, `schema`, `query`, `hnsw`,
//! `crypto`) defines its own `thiserror` enum for the failures it can
//! produce internally; this module folds all of them into the handful of
//! kinds a caller actually needs to branch on.

use std::fmt;

/// The failing page number, offset within that page, and the operation that
/// was in flight when an error was raised. All three are optional because
/// not every error kind has a natural page/offset (e.g. `ArgumentError`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub page_number: Option<u32>,
    pub offset: Option<usize>,
    pub operation: &'static str,
}

impl ErrorContext {
    pub fn new(operation: &'static str) -> Self {
        ErrorContext {
            page_number: None,
            offset: None,
            operation,
        }
    }

    pub fn at_page(mut self, page_number: u32) -> Self {
        self.page_number = Some(page_number);
        self
    }

    pub fn at_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "during {}", self.operation)?;
        if let Some(pn) = self.page_number {
            write!(f, " (page {}", pn)?;
            if let Some(off) = self.offset {
                write!(f, ", offset {}", off)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid database {ctx}: {reason}")]
    InvalidDatabase { reason: String, ctx: ErrorContext },

    #[error("corrupt page {ctx}: {reason}")]
    CorruptPage { reason: String, ctx: ErrorContext },

    #[error("crypto failure {ctx}: {reason}")]
    SharcCrypto { reason: String, ctx: ErrorContext },

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("argument error: {0}")]
    ArgumentError(String),

    #[error("argument out of range: {0}")]
    ArgumentOutOfRange(String),

    #[error("stale index {name}: persisted node count {persisted} does not match table ({resolved} rows)")]
    StaleIndex {
        name: String,
        persisted: usize,
        resolved: usize,
    },

    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn invalid_database(reason: impl Into<String>, ctx: ErrorContext) -> Self {
        Error::InvalidDatabase {
            reason: reason.into(),
            ctx,
        }
    }

    pub fn corrupt_page(reason: impl Into<String>, ctx: ErrorContext) -> Self {
        Error::CorruptPage {
            reason: reason.into(),
            ctx,
        }
    }

    pub fn io(operation: &'static str, source: std::io::Error) -> Self {
        Error::Io { operation, source }
    }

    pub fn crypto(reason: impl Into<String>, ctx: ErrorContext) -> Self {
        Error::SharcCrypto {
            reason: reason.into(),
            ctx,
        }
    }

    pub fn argument_error(reason: impl Into<String>) -> Self {
        Error::ArgumentError(reason.into())
    }

    pub fn argument_out_of_range(reason: impl Into<String>) -> Self {
        Error::ArgumentOutOfRange(reason.into())
    }

    pub fn unsupported_feature(reason: impl Into<String>) -> Self {
        Error::UnsupportedFeature(reason.into())
    }

    pub fn stale_index(name: impl Into<String>, persisted: usize, resolved: usize) -> Self {
        Error::StaleIndex {
            name: name.into(),
            persisted,
            resolved,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
