//! Error types for the migration system.

use std::path::PathBuf;

/// Errors that can occur while resolving revisions, comparing schemas or
/// running migrations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// `head` was requested but the graph has several heads.
    #[error(
        "Multiple heads are present: {}; please specify the head revision on which to operate",
        .heads.join(", ")
    )]
    MultipleHeads {
        /// Every head id, sorted.
        heads: Vec<String>,
    },

    /// The graph has more than one root revision.
    #[error("Multiple base revisions are present: {}", .bases.join(", "))]
    MultipleBases {
        /// Every root id, sorted.
        bases: Vec<String>,
    },

    /// No revision matches the given id or prefix.
    #[error("No such revision '{0}'")]
    RevisionNotFound(String),

    /// A prefix matched more than one revision.
    #[error("Multiple revisions start with '{prefix}': {}", .candidates.join(", "))]
    AmbiguousRevision {
        /// The prefix that was looked up.
        prefix: String,
        /// Matching ids, sorted.
        candidates: Vec<String>,
    },

    /// `lower` is not reachable from `upper` by following parents.
    #[error("Revision {lower} is not an ancestor of {upper}")]
    NotAnAncestor {
        /// The revision expected below.
        lower: String,
        /// The revision the walk started from.
        upper: String,
    },

    /// A relative `+N` / `-N` offset ran past the end of the chain.
    #[error("Relative revision {spec} didn't produce {expected} migrations (got {actual})")]
    RelativeShortfall {
        /// The relative specifier as given.
        spec: String,
        /// Number of steps requested.
        expected: usize,
        /// Number of steps available.
        actual: usize,
    },

    /// A revision specifier that could not be parsed.
    #[error("Invalid revision specifier '{0}'")]
    InvalidRevisionSpec(String),

    /// A revision with this id is already part of the graph.
    #[error("Revision '{0}' already exists")]
    DuplicateRevision(String),

    /// A new revision points at a parent the graph doesn't contain.
    #[error("Revision '{revision}' depends on '{parent}' which doesn't exist")]
    MissingParent {
        /// The revision being appended.
        revision: String,
        /// The parent it names.
        parent: String,
    },

    /// The driver can't report this kind of object.
    #[error("Reflection not supported: {0}")]
    Unsupported(String),

    /// A migration step failed; the surrounding transaction was rolled back.
    #[error(
        "Error running migration {} -> {}: {source}",
        .from.as_deref().unwrap_or("base"),
        .to.as_deref().unwrap_or("base")
    )]
    StepFailed {
        /// Revision the step started from.
        from: Option<String>,
        /// Revision the step was moving to.
        to: Option<String>,
        /// The underlying failure.
        #[source]
        source: Box<MigrateError>,
    },

    /// No dialect registered under this name.
    #[error("Unknown dialect '{0}'")]
    UnknownDialect(String),

    /// Database error during reflection or migration execution.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading/writing revision files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a revision file.
    #[error("Failed to parse revision file '{path}': {message}")]
    ParseError {
        /// Path to the revision file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Revision file already exists.
    #[error("Revision file already exists: {0}")]
    MigrationExists(PathBuf),

    /// No script directory found.
    #[error("Script directory not found: {0}")]
    MigrationsDirNotFound(PathBuf),

    /// Invalid migration state.
    #[error("Invalid migration state: {0}")]
    InvalidState(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MigrateError {
    /// Wraps an error with the revision pair that was executing.
    #[must_use]
    pub fn in_step(self, from: Option<&str>, to: Option<&str>) -> Self {
        Self::StepFailed {
            from: from.map(str::to_string),
            to: to.map(str::to_string),
            source: Box::new(self),
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_heads_names_every_head() {
        let err = MigrateError::MultipleHeads {
            heads: vec!["b1".to_string(), "b2".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("b1, b2"));
    }

    #[test]
    fn test_step_failed_names_revision_pair() {
        let err = MigrateError::InvalidState("boom".to_string()).in_step(None, Some("ae10"));
        assert_eq!(
            err.to_string(),
            "Error running migration base -> ae10: Invalid migration state: boom"
        );
    }
}
