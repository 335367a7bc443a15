use faer::linalg::svd::SvdError;

use crate::Status;

/// Errors raised by a user-supplied system while computing residuals.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[cfg_attr(not(feature = "unstable-exhaustive"), non_exhaustive)]
pub enum EvalError {
    /// The point lies outside the domain where the function is defined.
    #[error("The function cannot be evaluated here: {0}")]
    Domain(String),
    /// The point has the wrong number of components.
    #[error("Expected a point with {expected} components but got {got}")]
    WrongDimension {
        /// Dimension of the system.
        expected: usize,
        /// Length of the point that was passed in.
        got: usize,
    },
    /// The function returned NaN or infinity.
    #[error("Residual component {index} is not finite")]
    NonFinite {
        /// First offending residual component.
        index: usize,
    },
}

/// Errors that end a root-finding session.
#[derive(thiserror::Error, Debug)]
#[cfg_attr(not(feature = "unstable-exhaustive"), non_exhaustive)]
pub enum SolverError {
    /// The system could not be evaluated.
    #[error("{0}")]
    Eval(#[from] EvalError),
    /// The initial guess doesn't match the system's dimension.
    #[error(
        "The system has {expected} equations but the initial guess has {got} components"
    )]
    DimensionMismatch {
        /// Dimension of the system.
        expected: usize,
        /// Length of the initial guess.
        got: usize,
    },
    /// A system with zero equations has nothing to solve.
    #[error("Cannot solve an empty system")]
    EmptySystem,
    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The approximate Jacobian is not invertible to working precision,
    /// even after recomputing it by finite differences.
    #[error("The Jacobian is singular")]
    JacobianSingular,
    /// The trust region collapsed, or many iterations in a row barely
    /// reduced the residual.
    #[error("The iteration is not making progress towards a solution")]
    NoProgress,
    /// The iteration budget ran out before the residual test passed.
    /// Consider raising `max_iter`?
    #[error("Could not find a root within {max_iter} iterations")]
    MaxIterationsExceeded {
        /// The budget that was exhausted.
        max_iter: usize,
    },
    /// The iteration callback asked to stop.
    #[error("Solve cancelled")]
    Cancelled,
    /// Faer: could not decompose the Jacobian.
    #[error("Something went wrong doing SVD in faer")]
    Decomposition(SvdError),
}

impl SolverError {
    /// The terminal solver status this error corresponds to, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            SolverError::JacobianSingular => Some(Status::JacobianSingular),
            SolverError::NoProgress => Some(Status::NoProgress),
            SolverError::MaxIterationsExceeded { .. } => Some(Status::MaxIterExceeded),
            _ => None,
        }
    }
}
