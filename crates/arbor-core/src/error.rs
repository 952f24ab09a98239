//! Error types for model operations

use crate::handle::Handle;
use thiserror::Error;

/// Result alias used throughout the core.
pub type Result<T, E = ModelError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{element} does not exist")]
    DoesNotExist { element: String },

    /// The content a caller based its work on has changed since.
    #[error("snapshot is stale")]
    StaleSnapshot,

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to build structure of {element}")]
    BuildFailed {
        element: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("bad location: range {offset}+{length} in content of length {len}")]
    BadLocation {
        offset: usize,
        length: usize,
        len: usize,
    },

    #[error("{element} is not a working copy")]
    NotWorkingCopy { element: String },

    #[error("timed out acquiring working copy {element}")]
    AcquireTimeout { element: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ModelError {
    pub fn does_not_exist(handle: &Handle) -> Self {
        ModelError::DoesNotExist {
            element: handle.to_string(),
        }
    }

    pub fn not_working_copy(handle: &Handle) -> Self {
        ModelError::NotWorkingCopy {
            element: handle.to_string(),
        }
    }

    /// Wrap a builder error. Errors that already are model errors pass through.
    pub fn build_failed(handle: &Handle, error: anyhow::Error) -> Self {
        match error.downcast::<ModelError>() {
            Ok(model_error) => model_error,
            Err(source) => ModelError::BuildFailed {
                element: handle.to_string(),
                source,
            },
        }
    }

    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, ModelError::DoesNotExist { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_failed_passes_model_errors_through() {
        let file = Handle::root("/ws").project("p").source_file("a.rs");
        let err = ModelError::build_failed(&file, anyhow::Error::new(ModelError::Cancelled));
        assert!(matches!(err, ModelError::Cancelled));

        let err = ModelError::build_failed(&file, anyhow::anyhow!("syntax error"));
        match err {
            ModelError::BuildFailed { element, source } => {
                assert_eq!(element, "a.rs");
                assert_eq!(source.to_string(), "syntax error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
