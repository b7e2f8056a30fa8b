/// Core error types for the fisheye filter.

/// A specialized Result type for filter operations.
pub type FisheyeResult<T> = Result<T, FisheyeError>;

/// Top-level error type for the filter.
///
/// The first four variants are fatal at initialization: they surface through
/// filter construction and nothing else. `DispatchSubmission` is the only
/// runtime error and never crosses the host boundary — the render path
/// converts it into pass-through output and a failure count.
#[derive(Debug, thiserror::Error)]
pub enum FisheyeError {
    #[error("no compute-capable GPU device available: {0}")]
    DeviceUnavailable(String),

    #[error("failed to load kernel library: {0}")]
    LibraryLoad(String),

    #[error("kernel entry point `{0}` not found")]
    FunctionNotFound(String),

    #[error("failed to create compute pipeline: {0}")]
    PipelineCreation(String),

    #[error("dispatch submission failed: {0}")]
    DispatchSubmission(String),
}

impl FisheyeError {
    /// Whether this error is fatal at initialization (disables the filter
    /// for the session) as opposed to recoverable per-frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FisheyeError::DispatchSubmission(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_unavailable_display() {
        let err = FisheyeError::DeviceUnavailable("no adapter".into());
        assert_eq!(
            err.to_string(),
            "no compute-capable GPU device available: no adapter"
        );
    }

    #[test]
    fn test_function_not_found_display() {
        let err = FisheyeError::FunctionNotFound("equirectToFisheye".into());
        assert!(err.to_string().contains("equirectToFisheye"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(FisheyeError::DeviceUnavailable(String::new()).is_fatal());
        assert!(FisheyeError::LibraryLoad(String::new()).is_fatal());
        assert!(FisheyeError::PipelineCreation(String::new()).is_fatal());
        assert!(!FisheyeError::DispatchSubmission(String::new()).is_fatal());
    }
}
