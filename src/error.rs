//! Typed failures for the retrieval pipeline.
//!
//! Every core operation returns [`Result`]. Variants map one-to-one onto the
//! failure classes callers are expected to handle differently: a rejected
//! or unreadable upload, a bad chunking configuration, a failing or slow embedding service,
//! a storage fault, or invalid query parameters.
//!
//! Application glue (CLI, config loading, server bootstrap) keeps using
//! `anyhow`; these errors convert into it through `?`.

use thiserror::Error;

/// Result alias for core pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by ingestion, retrieval, and storage.
#[derive(Debug, Error)]
pub enum Error {
    /// The upload's file type is not one the extractor understands.
    #[error("unsupported file type '{extension}' for {filename}")]
    UnsupportedFileType { filename: String, extension: String },

    /// The upload has a supported type but its bytes could not be read as one.
    #[error("could not extract text from {filename}: {reason}")]
    Extraction { filename: String, reason: String },

    /// Chunking parameters are invalid, e.g. overlap >= chunk size.
    #[error("chunking error: {0}")]
    Chunking(String),

    /// The embedding gateway failed, returned malformed data, or timed out.
    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    /// Persistence failure, dimensionality mismatch, or corrupt stored data.
    #[error("vector store error: {0}")]
    VectorStore(String),

    /// Invalid query parameters (empty query, `top_k == 0`, bad floor).
    #[error("invalid query: {0}")]
    Query(String),

    /// The generation gateway failed or timed out.
    #[error("generation service error: {0}")]
    Generation(String),

    /// Ingestion of one document failed; `source` says why.
    #[error("failed to ingest {filename}: {source}")]
    Ingest {
        filename: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap this error with the filename of the document being ingested.
    pub fn for_document(self, filename: &str) -> Self {
        match self {
            // Already names the document.
            e @ (Error::UnsupportedFileType { .. }
            | Error::Extraction { .. }
            | Error::Ingest { .. }) => e,
            other => Error::Ingest {
                filename: filename.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through [`Error::Ingest`] wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Ingest { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stable machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self.root() {
            Error::UnsupportedFileType { .. } => "unsupported_file_type",
            Error::Extraction { .. } | Error::Chunking(_) | Error::Query(_) => "bad_request",
            Error::EmbeddingService(_) => "embedding_service",
            Error::VectorStore(_) => "vector_store",
            Error::Generation(_) => "generation",
            Error::Ingest { .. } => "internal",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::VectorStore(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_document_wraps_once() {
        let err = Error::EmbeddingService("timeout".into())
            .for_document("a.txt")
            .for_document("b.txt");
        match &err {
            Error::Ingest { filename, .. } => assert_eq!(filename, "a.txt"),
            other => panic!("expected ingest wrapper, got {:?}", other),
        }
        assert!(matches!(err.root(), Error::EmbeddingService(_)));
        assert!(err.to_string().contains("a.txt"));
    }

    #[test]
    fn test_unsupported_type_not_wrapped() {
        let err = Error::UnsupportedFileType {
            filename: "x.exe".into(),
            extension: ".exe".into(),
        }
        .for_document("x.exe");
        assert!(matches!(err, Error::UnsupportedFileType { .. }));
        assert_eq!(err.code(), "unsupported_file_type");
    }

    #[test]
    fn test_extraction_failure_names_file_once() {
        let err = Error::Extraction {
            filename: "scan.pdf".into(),
            reason: "invalid xref".into(),
        }
        .for_document("scan.pdf");
        assert!(matches!(err, Error::Extraction { .. }));
        assert_eq!(err.code(), "bad_request");
        assert_eq!(
            err.to_string(),
            "could not extract text from scan.pdf: invalid xref"
        );
    }

    #[test]
    fn test_codes_follow_root() {
        let err = Error::VectorStore("disk full".into()).for_document("a.md");
        assert_eq!(err.code(), "vector_store");
        assert_eq!(Error::Query("top_k".into()).code(), "bad_request");
    }
}
