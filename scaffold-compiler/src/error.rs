//! Error types for scaffold-compiler.
//!
//! Problems inside a blueprint never surface here; they become
//! [`Diagnostic`](scaffold_core::Diagnostic)s on the compile result. These
//! errors cover the engine itself and reading the blueprint file.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    /// Tera failed to parse or render a template; the message carries the
    /// full cause chain.
    #[error("template error: {0}")]
    Template(String),

    /// Building the tera context from variables failed.
    #[error("context serialization error: {0}")]
    Serialization(#[from] tera::Error),

    /// Filesystem error while reading a blueprint.
    #[error("blueprint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    /// Flatten a tera error and its sources into one line.
    pub(crate) fn template(err: &tera::Error) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        CompileError::Template(message)
    }
}
