//! Derivative-free root finding for square systems of nonlinear equations.
//!
//! The solver is Powell's hybrid method: a dogleg trust-region iteration
//! whose Jacobian comes from forward differences and is then kept current
//! with Broyden rank-one updates. Optionally the variables are rescaled by
//! the column norms of the Jacobian.
//!
//! Use [`solve`] to run to convergence, or drive a [`Solver`] one
//! [`Solver::iterate`] at a time.
//!
//! ```
//! use multiroot::{Config, problems};
//!
//! let params = problems::RosenbrockParams::default();
//! let outcome = multiroot::solve(
//!     problems::rosenbrock(&params),
//!     &problems::ROSENBROCK_GUESS,
//!     Config::scaled(),
//! )
//! .unwrap();
//! assert!((outcome.x()[1] - 1.0).abs() < 1e-6);
//! ```

pub use crate::convergence::{Convergence, test_delta, test_residual};
pub use crate::dogleg::StepKind;
pub use crate::driver::{
    Control, ConvergedBy, FailureOutcome, IterationStats, SolveOutcome, solve, solve_cb,
};
pub use crate::error::{EvalError, SolverError};
pub use crate::linalg::{Matrix, Vector};
pub use crate::solver::{Config, DeltaInit, Solver, Status};
pub use crate::system::{Function, NonlinearSystem};

/// Residual and step-size tests.
mod convergence;
/// Trust-region step selection.
mod dogleg;
/// Runs a solver to completion.
mod driver;
mod error;
/// Finite differences and Broyden updates.
mod jacobian;
mod linalg;
pub mod problems;
/// The hybrid iteration itself.
mod solver;
/// What a system of equations looks like to the solver.
mod system;
/// Unit tests
#[cfg(test)]
mod tests;
