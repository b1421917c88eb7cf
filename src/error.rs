//! Error types.
//!
//! Library code returns typed errors (`FitError`, `DetectError`); the binary
//! boundary converts them into `AppError`, which carries a process exit code:
//!
//! - 2: input, configuration or I/O problems
//! - 3: nothing to fit
//! - 4: fit failure

use thiserror::Error;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Failure reported by a step-detection primitive.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectError {
    #[error("non-finite residual at sample {index}")]
    NonFinite { index: usize },
    #[error("detection did not converge: {0}")]
    NotConverged(String),
}

/// Failure of the iterative step fitter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("threshold must be finite and >= 0 (got {0})")]
    InvalidThreshold(f64),
    #[error("pass count must be at least 1")]
    ZeroPasses,
    #[error("non-finite intensity at sample {index}")]
    NonFinite { index: usize },
    #[error("step detection failed on pass {pass}: {source}")]
    Detection {
        pass: usize,
        #[source]
        source: DetectError,
    },
    #[error("internal fault on pass {pass}: candidate fit has {actual} samples, expected {expected}")]
    LengthMismatch {
        pass: usize,
        expected: usize,
        actual: usize,
    },
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let code = match err {
            FitError::InvalidThreshold(_) | FitError::ZeroPasses => 2,
            _ => 4,
        };
        AppError::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_error_exit_codes() {
        assert_eq!(AppError::from(FitError::ZeroPasses).exit_code(), 2);
        let err = FitError::Detection {
            pass: 2,
            source: DetectError::NotConverged("stalled".to_string()),
        };
        let app = AppError::from(err);
        assert_eq!(app.exit_code(), 4);
        assert_eq!(
            app.to_string(),
            "step detection failed on pass 2: detection did not converge: stalled"
        );
    }
}
