use thiserror::Error;

use crate::executor::branch::Branch;

/// Errors raised while stepping a single state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// A construct that is not modelled. Only the current path is abandoned.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    /// An internal invariant does not hold. Aborts the whole run.
    #[error("BUG: {0}")]
    Bug(String),
}

pub type StepResult = Result<Vec<Branch>, StepError>;

/// Errors returned by the symbolic executor driver.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("BUG: {0}")]
    Bug(String),
    #[error("invalid program: {0}")]
    InvalidProgram(String),
}

impl From<StepError> for ExecutorError {
    fn from(e: StepError) -> Self {
        match e {
            StepError::Bug(msg) => ExecutorError::Bug(msg),
            StepError::Unimplemented(msg) => {
                ExecutorError::InvalidProgram(format!("unimplemented: {}", msg))
            }
        }
    }
}

#[macro_export]
macro_rules! unimplemented_step {
    ($($arg:tt)*) => {
        $crate::executor::error::StepError::Unimplemented(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! bug {
    ($($arg:tt)*) => {
        $crate::executor::error::StepError::Bug(format!($($arg)*))
    };
}
