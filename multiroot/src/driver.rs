use crate::{
    Config, NonlinearSystem, Solver, SolverError, Status, StepKind,
    convergence::{test_delta, test_residual},
};

/// Snapshot handed to the per-iteration callback.
#[derive(Clone, Copy, Debug)]
pub struct IterationStats<'a> {
    /// Iterations completed so far. 0 is the initial guess.
    pub iter: usize,
    /// Current point.
    pub x: &'a [f64],
    /// Residuals at the current point.
    pub f: &'a [f64],
    /// Sum of absolute residuals, the quantity the residual test looks at.
    pub residual: f64,
    /// Trust-region radius.
    pub delta: f64,
    /// Kind of step the last iteration proposed, if any.
    pub step: Option<StepKind>,
    /// Solver status after this iteration.
    pub status: Status,
}

impl<'a> IterationStats<'a> {
    fn new<S: NonlinearSystem>(solver: &'a Solver<S>) -> Self {
        Self {
            iter: solver.iterations(),
            x: solver.x(),
            f: solver.f(),
            residual: solver.f().iter().map(|v| v.abs()).sum(),
            delta: solver.delta(),
            step: solver.last_step(),
            status: solver.status(),
        }
    }
}

/// What the callback wants the driver to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    /// Keep going.
    Continue,
    /// Stop now and report [`SolverError::Cancelled`].
    Cancel,
}

/// Which test declared the solve converged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConvergedBy {
    /// The residuals are within tolerance.
    Residual,
    /// The last step was within the step tolerances.
    StepSize,
}

/// Data from a successful solve.
#[derive(Debug, Clone)]
#[cfg_attr(not(feature = "unstable-exhaustive"), non_exhaustive)]
pub struct SolveOutcome {
    pub(crate) x: Vec<f64>,
    pub(crate) f: Vec<f64>,
    pub(crate) iterations: usize,
    pub(crate) evaluations: usize,
    pub(crate) converged_by: ConvergedBy,
}

impl SolveOutcome {
    /// The root that was found.
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Residuals at the root.
    pub fn f(&self) -> &[f64] {
        &self.f
    }

    /// How many iterations were required?
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// How many times was the system evaluated, finite differences included?
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Which test passed.
    pub fn converged_by(&self) -> ConvergedBy {
        self.converged_by
    }

    /// Take the root, dropping the rest.
    pub fn into_solution(self) -> Vec<f64> {
        self.x
    }
}

/// Returned when a root could not be found.
#[derive(Debug)]
#[cfg_attr(not(feature = "unstable-exhaustive"), non_exhaustive)]
pub struct FailureOutcome {
    /// The error that stopped the solve.
    pub error: SolverError,
    /// The last point the solver reached.
    pub x: Vec<f64>,
    /// Residuals at `x`. `None` when the solver never got to evaluate them.
    pub f: Option<Vec<f64>>,
    /// Iterations completed before giving up.
    pub iterations: usize,
    /// Evaluations made before giving up.
    pub evaluations: usize,
}

impl FailureOutcome {
    fn from_solver<S: NonlinearSystem>(solver: &Solver<S>, error: SolverError) -> Self {
        Self {
            error,
            x: solver.x().to_vec(),
            f: Some(solver.f().to_vec()),
            iterations: solver.iterations(),
            evaluations: solver.evaluations(),
        }
    }

    /// The error that stopped the solve.
    pub fn error(&self) -> &SolverError {
        &self.error
    }

    /// The last point the solver reached.
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Residuals at the last point, if they were evaluated.
    pub fn f(&self) -> Option<&[f64]> {
        self.f.as_deref()
    }
}

/// Find a root of `system` starting from `x0`.
pub fn solve<S: NonlinearSystem>(
    system: S,
    x0: &[f64],
    config: Config,
) -> Result<SolveOutcome, FailureOutcome> {
    solve_cb(system, x0, config, |_| Control::Continue)
}

/// Like [`solve`], calling `on_iter` with the initial state and after every iteration.
pub fn solve_cb<S, Cb>(
    system: S,
    x0: &[f64],
    config: Config,
    mut on_iter: Cb,
) -> Result<SolveOutcome, FailureOutcome>
where
    S: NonlinearSystem,
    Cb: FnMut(&IterationStats<'_>) -> Control,
{
    let tol = config.tol_residual;
    let max_iter = config.max_iter;
    let step_test = config
        .step_test_enabled()
        .then_some((config.step_tol_abs, config.step_tol_rel));

    let mut solver = match Solver::new(system, x0, config) {
        Ok(solver) => solver,
        Err(error) => {
            return Err(FailureOutcome {
                error,
                x: x0.to_vec(),
                f: None,
                iterations: 0,
                evaluations: 0,
            });
        }
    };

    let done = |solver: &Solver<S>, converged_by| SolveOutcome {
        x: solver.x().to_vec(),
        f: solver.f().to_vec(),
        iterations: solver.iterations(),
        evaluations: solver.evaluations(),
        converged_by,
    };

    if on_iter(&IterationStats::new(&solver)) == Control::Cancel {
        return Err(FailureOutcome::from_solver(&solver, SolverError::Cancelled));
    }

    loop {
        if test_residual(solver.f(), tol).is_success() {
            return Ok(done(&solver, ConvergedBy::Residual));
        }
        if solver.iterations() >= max_iter {
            return Err(FailureOutcome::from_solver(
                &solver,
                SolverError::MaxIterationsExceeded { max_iter },
            ));
        }

        let status = match solver.iterate() {
            Ok(status) => status,
            Err(error) => return Err(FailureOutcome::from_solver(&solver, error)),
        };
        if on_iter(&IterationStats::new(&solver)) == Control::Cancel {
            return Err(FailureOutcome::from_solver(&solver, SolverError::Cancelled));
        }

        let error = match status {
            Status::Continue => None,
            Status::Success => return Ok(done(&solver, ConvergedBy::Residual)),
            Status::JacobianSingular => Some(SolverError::JacobianSingular),
            Status::NoProgress => Some(SolverError::NoProgress),
            Status::MaxIterExceeded => Some(SolverError::MaxIterationsExceeded { max_iter }),
        };
        if let Some(error) = error {
            log::debug!("solve stopped after {} iterations: {error}", solver.iterations());
            return Err(FailureOutcome::from_solver(&solver, error));
        }

        if let Some((epsabs, epsrel)) = step_test
            && test_delta(solver.dx(), solver.x(), epsabs, epsrel).is_success()
        {
            return Ok(done(&solver, ConvergedBy::StepSize));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EvalError, Function, tests::bits};

    fn linear(x: &[f64], _: &(), out: &mut [f64]) -> Result<(), EvalError> {
        out[0] = 2.0 * x[0] + x[1] - 3.0;
        out[1] = x[0] - x[1];
        Ok(())
    }

    #[test]
    fn outcome_getters() {
        let so = SolveOutcome {
            x: vec![1.0],
            f: vec![0.0],
            iterations: 3,
            evaluations: 7,
            converged_by: ConvergedBy::StepSize,
        };
        assert_eq!(so.iterations(), 3);
        assert_eq!(so.evaluations(), 7);
        assert_eq!(so.converged_by(), ConvergedBy::StepSize);
        assert_eq!(bits(&so.into_solution()), bits(&[1.0]));
    }

    #[test]
    fn callback_sees_every_iteration() {
        let system = Function::new(2, &(), linear);
        let mut seen = Vec::new();
        let outcome = solve_cb(&system, &[0.0, 0.0], Config::default(), |stats| {
            seen.push(stats.iter);
            Control::Continue
        })
        .unwrap();
        assert_eq!(seen, (0..=outcome.iterations()).collect::<Vec<_>>());
    }

    #[test]
    fn cancel_stops_the_solve() {
        let system = Function::new(2, &(), linear);
        let failure = solve_cb(&system, &[0.0, 0.0], Config::default(), |_| {
            Control::Cancel
        })
        .unwrap_err();
        assert!(matches!(failure.error(), SolverError::Cancelled));
        assert_eq!(failure.iterations, 0);
        assert_eq!(bits(failure.x()), bits(&[0.0, 0.0]));
    }

    #[test]
    fn setup_errors_are_failures() {
        let system = Function::new(2, &(), linear);
        let failure = solve(&system, &[0.0], Config::default()).unwrap_err();
        assert!(matches!(
            failure.error,
            SolverError::DimensionMismatch { .. }
        ));
        assert!(failure.f().is_none());
    }

    #[test]
    fn zero_budget_fails_unless_already_converged() {
        let system = Function::new(2, &(), linear);
        let config = Config::default().with_max_iter(0);
        let failure = solve(&system, &[0.0, 0.0], config.clone()).unwrap_err();
        assert!(matches!(
            failure.error,
            SolverError::MaxIterationsExceeded { max_iter: 0 }
        ));
        let outcome = solve(&system, &[1.0, 1.0], config).unwrap();
        assert_eq!(outcome.iterations(), 0);
    }
}
