use crate::config::ConfigError;
use crate::data::ExtractError;
use crate::load::LoadError;
use crate::transform::TransformError;

/// Top-level failure of a run: a process exit code plus a human-readable message.
///
/// Exit codes: 2 configuration, 3 transform, 4 extraction, 5 load.
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

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::new(2, format!("Configuration failed: {err}"))
    }
}

impl From<TransformError> for AppError {
    fn from(err: TransformError) -> Self {
        AppError::new(3, format!("Transform failed: {err}"))
    }
}

impl From<ExtractError> for AppError {
    fn from(err: ExtractError) -> Self {
        AppError::new(4, format!("Extraction failed: {err}"))
    }
}

impl From<LoadError> for AppError {
    fn from(err: LoadError) -> Self {
        AppError::new(5, format!("Load failed: {err}"))
    }
}
