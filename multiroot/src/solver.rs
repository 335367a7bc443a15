use crate::{
    Convergence, EvalError, Matrix, NonlinearSystem, SolverError, Vector,
    convergence::test_residual,
    dogleg::{Dogleg, StepKind},
    jacobian::JacobianEstimator,
    linalg::DenseLu,
    system::evaluate_into,
};

/// How the trust-region radius is chosen when a solve starts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeltaInit {
    /// `factor * ||D x0||`, or `factor` itself when x0 is zero.
    Estimated {
        /// Multiplier on the scaled norm of the initial guess.
        factor: f64,
    },
    /// Start from exactly this radius.
    Fixed(f64),
}

impl Default for DeltaInit {
    fn default() -> Self {
        DeltaInit::Estimated { factor: 100.0 }
    }
}

/// Solver configuration. Build it with [`Config::default`] and the `with_*` methods.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// The residual test passes once the sum of |f_i| is at most this.
    pub tol_residual: f64,
    /// Iteration budget for the driver.
    pub max_iter: usize,
    /// Absolute tolerance of the optional step-size test.
    pub step_tol_abs: f64,
    /// Relative tolerance of the optional step-size test.
    pub step_tol_rel: f64,
    /// Rescale variables by the column norms of the Jacobian.
    pub scaled: bool,
    /// Initial trust-region radius.
    pub delta_init: DeltaInit,
    /// Smallest trust-region radius. Rejecting a step at this radius means we're stuck.
    pub delta_min: f64,
    /// Largest trust-region radius.
    pub delta_max: f64,
    /// Below this gain ratio the radius shrinks.
    pub shrink_threshold: f64,
    /// At or above this gain ratio the radius may grow.
    pub expand_threshold: f64,
    /// Steps with a gain ratio below this are rejected.
    pub accept_threshold: f64,
    /// Radius multiplier after a poor step.
    pub shrink_factor: f64,
    /// Radius multiplier after a good step, applied to the step length.
    pub expand_factor: f64,
    /// Consecutive rejected steps before a Broyden-updated Jacobian is
    /// recomputed by finite differences.
    pub refresh_after_failures: usize,
    /// Consecutive iterations with almost no actual reduction before giving up.
    pub slow_progress_limit: usize,
    /// Relative finite-difference step.
    pub fd_step: f64,
    /// Jacobians with `sigma_min / sigma_max` at or below this count as singular.
    pub singular_tolerance: f64,
}

impl Default for Config {
    fn default() -> Self {
        let sqrt_eps = f64::EPSILON.sqrt();
        Self {
            tol_residual: 1e-7,
            max_iter: 1000,
            step_tol_abs: 0.0,
            step_tol_rel: 0.0,
            scaled: false,
            delta_init: DeltaInit::default(),
            delta_min: sqrt_eps,
            delta_max: 1e10,
            shrink_threshold: 0.1,
            expand_threshold: 0.5,
            accept_threshold: 1e-4,
            shrink_factor: 0.5,
            expand_factor: 2.0,
            refresh_after_failures: 1,
            slow_progress_limit: 10,
            fd_step: sqrt_eps,
            singular_tolerance: 1e-12,
        }
    }
}

impl Config {
    /// The scaled variant, which adapts to badly scaled variables.
    pub fn scaled() -> Self {
        Self {
            scaled: true,
            ..Default::default()
        }
    }
    /// Set the residual tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol_residual = tol;
        self
    }
    /// Set the iteration budget.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }
    /// Switch on the step-size test.
    pub fn with_step_tol(mut self, epsabs: f64, epsrel: f64) -> Self {
        self.step_tol_abs = epsabs;
        self.step_tol_rel = epsrel;
        self
    }
    /// Turn variable scaling on or off.
    pub fn with_scaling(mut self, enabled: bool) -> Self {
        self.scaled = enabled;
        self
    }
    /// Choose the initial radius.
    pub fn with_delta_init(mut self, delta_init: DeltaInit) -> Self {
        self.delta_init = delta_init;
        self
    }
    /// Bound the radius to `[delta_min, delta_max]`.
    pub fn with_delta_bounds(mut self, delta_min: f64, delta_max: f64) -> Self {
        self.delta_min = delta_min;
        self.delta_max = delta_max;
        self
    }
    /// Rejected steps tolerated before recomputing the Jacobian.
    pub fn with_refresh_after_failures(mut self, failures: usize) -> Self {
        self.refresh_after_failures = failures;
        self
    }

    /// Is the step-size test switched on?
    pub fn step_test_enabled(&self) -> bool {
        self.step_tol_abs > 0.0 || self.step_tol_rel > 0.0
    }

    /// Check every field is in range.
    pub fn validate(&self) -> Result<(), SolverError> {
        fn check(ok: bool, msg: &'static str) -> Result<(), SolverError> {
            if ok {
                Ok(())
            } else {
                Err(SolverError::InvalidConfig(msg))
            }
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;

        check(
            non_negative(self.tol_residual),
            "tol_residual must be finite and non-negative",
        )?;
        check(
            non_negative(self.step_tol_abs) && non_negative(self.step_tol_rel),
            "step tolerances must be finite and non-negative",
        )?;
        check(positive(self.delta_min), "delta_min must be positive")?;
        check(
            positive(self.delta_max) && self.delta_max >= self.delta_min,
            "delta_max must be finite and at least delta_min",
        )?;
        match self.delta_init {
            DeltaInit::Estimated { factor } => {
                check(positive(factor), "delta_init factor must be positive")?
            }
            DeltaInit::Fixed(delta) => check(positive(delta), "delta_init must be positive")?,
        }
        check(
            positive(self.accept_threshold) && self.accept_threshold < 1.0,
            "accept_threshold must be in (0, 1)",
        )?;
        check(
            positive(self.shrink_threshold) && self.shrink_threshold < 1.0,
            "shrink_threshold must be in (0, 1)",
        )?;
        check(
            self.expand_threshold.is_finite()
                && self.expand_threshold >= self.shrink_threshold
                && self.expand_threshold < 1.0,
            "expand_threshold must be in [shrink_threshold, 1)",
        )?;
        check(
            positive(self.shrink_factor) && self.shrink_factor < 1.0,
            "shrink_factor must be in (0, 1)",
        )?;
        check(
            self.expand_factor.is_finite() && self.expand_factor > 1.0,
            "expand_factor must be greater than 1",
        )?;
        check(
            self.refresh_after_failures >= 1,
            "refresh_after_failures must be at least 1",
        )?;
        check(
            self.slow_progress_limit >= 1,
            "slow_progress_limit must be at least 1",
        )?;
        check(positive(self.fd_step), "fd_step must be positive")?;
        check(
            non_negative(self.singular_tolerance) && self.singular_tolerance < 1.0,
            "singular_tolerance must be in [0, 1)",
        )
    }
}

/// Where a solver is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// Still iterating.
    Continue,
    /// The residual test passed.
    Success,
    /// The Jacobian stayed singular after a finite-difference refresh.
    JacobianSingular,
    /// The trust region collapsed or the residual stopped going down.
    NoProgress,
    /// The iteration budget ran out.
    MaxIterExceeded,
}

impl Status {
    /// Will further calls to [`Solver::iterate`] do nothing?
    pub fn is_terminal(self) -> bool {
        self != Status::Continue
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Continue => "the iteration has not converged yet",
            Status::Success => "success",
            Status::JacobianSingular => "the Jacobian is singular",
            Status::NoProgress => "the iteration is not making progress towards a solution",
            Status::MaxIterExceeded => "exceeded the maximum number of iterations",
        };
        f.write_str(s)
    }
}

/// A hybrid dogleg root finder for one system, advanced one iteration at a time.
///
/// The solver owns all of its working storage. Nothing is allocated after
/// [`Solver::new`], and everything is released when it's dropped.
///
/// ```
/// use multiroot::{Config, Solver, Status, problems};
///
/// let params = problems::RosenbrockParams::default();
/// let system = problems::rosenbrock(&params);
/// let mut solver = Solver::new(system, &[-10.0, -5.0], Config::scaled()).unwrap();
/// while solver.iterate().unwrap() == Status::Continue {}
/// assert_eq!(solver.status(), Status::Success);
/// assert!((solver.x()[0] - 1.0).abs() < 1e-6);
/// ```
#[derive(Debug)]
pub struct Solver<S> {
    system: S,
    config: Config,
    x: Vector,
    f: Vector,
    jac: Matrix,
    lu: DenseLu,
    diag: Vector,
    delta: f64,
    /// Last proposed step, accepted or not.
    dx: Vector,
    iterations: usize,
    evaluations: usize,
    /// Consecutive rejected steps.
    ncfail: usize,
    /// Consecutive successful steps.
    ncsuc: usize,
    /// Consecutive iterations with poor actual reduction.
    nslow: usize,
    status: Status,
    last_step: Option<StepKind>,
    estimator: JacobianEstimator,
    dogleg: Dogleg,
    x_trial: Vector,
    f_trial: Vector,
    /// Finite-difference estimates land here before replacing `jac`.
    jac_trial: Matrix,
    model: Vector,
}

impl<S: NonlinearSystem> Solver<S> {
    /// Validate `config`, evaluate the system at `x0`, and seed the Jacobian,
    /// scaling, and trust region.
    pub fn new(system: S, x0: &[f64], config: Config) -> Result<Self, SolverError> {
        config.validate()?;
        let n = system.dimension();
        if n == 0 {
            return Err(SolverError::EmptySystem);
        }
        if x0.len() != n {
            return Err(SolverError::DimensionMismatch {
                expected: n,
                got: x0.len(),
            });
        }
        let mut solver = Self {
            lu: DenseLu::new(config.singular_tolerance),
            estimator: JacobianEstimator::new(n, config.fd_step),
            system,
            config,
            x: Vector::zeros(n),
            f: Vector::zeros(n),
            jac: Matrix::zeros(n),
            diag: Vector::zeros(n),
            delta: 0.0,
            dx: Vector::zeros(n),
            iterations: 0,
            evaluations: 0,
            ncfail: 0,
            ncsuc: 0,
            nslow: 0,
            status: Status::Continue,
            last_step: None,
            dogleg: Dogleg::new(n),
            x_trial: Vector::zeros(n),
            f_trial: Vector::zeros(n),
            jac_trial: Matrix::zeros(n),
            model: Vector::zeros(n),
        };
        solver.set(x0)?;
        Ok(solver)
    }

    /// Restart from a new initial guess, keeping the system and configuration.
    ///
    /// If the system cannot be evaluated at `x0`, or its Jacobian cannot be
    /// differenced there, the error is returned and the solver is left as it was.
    pub fn set(&mut self, x0: &[f64]) -> Result<(), SolverError> {
        let n = self.x.len();
        if x0.len() != n {
            return Err(SolverError::DimensionMismatch {
                expected: n,
                got: x0.len(),
            });
        }

        self.x_trial.copy_from(x0);
        evaluate_into(&self.system, &self.x_trial, &mut self.f_trial)?;
        let mut evaluations = 1;
        if let Some(index) = self.f_trial.iter().position(|v| !v.is_finite()) {
            return Err(EvalError::NonFinite { index }.into());
        }
        self.estimator.estimate(
            &self.system,
            &self.x_trial,
            &self.f_trial,
            &mut self.jac_trial,
            &mut evaluations,
        )?;

        std::mem::swap(&mut self.x, &mut self.x_trial);
        std::mem::swap(&mut self.f, &mut self.f_trial);
        std::mem::swap(&mut self.jac, &mut self.jac_trial);
        self.iterations = 0;
        self.evaluations = evaluations;
        self.ncfail = 0;
        self.ncsuc = 0;
        self.nslow = 0;
        self.status = Status::Continue;
        self.last_step = None;
        self.dx.fill(0.0);

        if self.config.scaled {
            self.diag = self.jac.column_norms();
            self.diag
                .iter_mut()
                .filter(|d| **d == 0.0)
                .for_each(|d| *d = 1.0);
        } else {
            self.diag.fill(1.0);
        }

        let delta = match self.config.delta_init {
            DeltaInit::Estimated { factor } => {
                let xnorm = self.x.scaled_norm(&self.diag);
                if xnorm > 0.0 { factor * xnorm } else { factor }
            }
            DeltaInit::Fixed(delta) => delta,
        };
        self.delta = self.clamp_delta(delta);
        log::debug!(
            "initialized: |f| = {}, delta = {}, scaled = {}",
            self.f.norm(),
            self.delta,
            self.config.scaled
        );
        Ok(())
    }

    /// Take one step of the hybrid method and report the new status.
    ///
    /// An error from evaluating the system leaves the iteration unapplied:
    /// `x`, `f`, J, the radius, and the iteration count keep their values, and only
    /// [`Solver::dx`] and [`Solver::last_step`] show the step that was tried.
    /// Once the status is terminal, further calls return it without doing any work.
    pub fn iterate(&mut self) -> Result<Status, SolverError> {
        if self.status.is_terminal() {
            return Ok(self.status);
        }
        if self.iterations >= self.config.max_iter {
            self.status = Status::MaxIterExceeded;
            return Ok(self.status);
        }
        let fnorm = self.f.norm();
        if fnorm == 0.0 {
            self.status = Status::Success;
            return Ok(self.status);
        }

        if !self.factor()? {
            self.status = Status::JacobianSingular;
            return Ok(self.status);
        }

        let kind = match self.dogleg.compute(
            &self.lu,
            &self.jac,
            &self.f,
            &self.diag,
            self.delta,
            &mut self.dx,
        ) {
            Ok(kind) => kind,
            Err(SolverError::JacobianSingular) => {
                self.status = Status::JacobianSingular;
                return Ok(self.status);
            }
            Err(e) => return Err(e),
        };
        self.last_step = Some(kind);
        let pnorm = self.dx.scaled_norm(&self.diag);

        // The first step bounds the radius from above.
        let delta = if self.iterations == 0 && pnorm < self.delta {
            self.clamp_delta(pnorm)
        } else {
            self.delta
        };

        self.x_trial.copy_from(&self.x);
        self.x_trial.axpy(1.0, &self.dx);
        evaluate_into(&self.system, &self.x_trial, &mut self.f_trial)?;
        self.evaluations += 1;

        let actual = if self.f_trial.is_finite() {
            let ftnorm = self.f_trial.norm();
            if ftnorm < fnorm {
                1.0 - (ftnorm / fnorm).powi(2)
            } else {
                -1.0
            }
        } else {
            log::debug!("trial point is not evaluable, gain ratio = 0");
            -1.0
        };

        self.jac.mul_vec(&self.dx, &mut self.model);
        self.model.axpy(1.0, &self.f);
        let mnorm = self.model.norm();
        let predicted = if mnorm < fnorm {
            1.0 - (mnorm / fnorm).powi(2)
        } else {
            0.0
        };
        let rho = if predicted > 0.0 && self.f_trial.is_finite() {
            actual / predicted
        } else {
            0.0
        };
        log::debug!("gain ratio = {actual} / {predicted} = {rho}");

        let accepted = rho >= self.config.accept_threshold;
        // Nothing is committed until this refresh has succeeded.
        let refreshed = !accepted
            && self
                .estimator
                .needs_refresh(self.ncfail + 1, self.config.refresh_after_failures);
        if refreshed {
            self.refresh_jacobian()?;
        }

        self.delta = delta;
        self.update_radius(rho, pnorm);
        if accepted {
            self.ncfail = 0;
            // Reuse the trial buffer for df = F(x + p) - F(x).
            std::mem::swap(&mut self.f, &mut self.f_trial);
            self.f_trial.axpy(-1.0, &self.f);
            self.f_trial.scale(-1.0);
            std::mem::swap(&mut self.x, &mut self.x_trial);
            self.estimator
                .update(&mut self.jac, &self.dx, &self.f_trial);
            self.update_diag();
            log::debug!("step accepted, |f| = {}", self.f.norm());
        } else {
            self.ncfail = if refreshed { 0 } else { self.ncfail + 1 };
            log::debug!(
                "step rejected, threshold for accepting = {}",
                self.config.accept_threshold
            );
        }

        if actual >= 1e-3 {
            self.nslow = 0;
        } else {
            self.nslow += 1;
        }

        self.iterations += 1;
        self.status = if accepted
            && test_residual(&self.f, self.config.tol_residual) == Convergence::Success
        {
            Status::Success
        } else if (!accepted && self.delta <= self.config.delta_min)
            || self.nslow >= self.config.slow_progress_limit
        {
            log::debug!(
                "no progress: delta = {}, slow iterations = {}",
                self.delta,
                self.nslow
            );
            Status::NoProgress
        } else {
            Status::Continue
        };
        Ok(self.status)
    }

    /// Factor J, refreshing it once by finite differences if it came from
    /// Broyden updates and turned out singular. Ok(false) means singular.
    fn factor(&mut self) -> Result<bool, SolverError> {
        match self.lu.factor(&self.jac) {
            Ok(()) => return Ok(true),
            Err(SolverError::JacobianSingular) if !self.estimator.is_fresh() => {
                log::debug!("updated Jacobian is singular, recomputing it");
            }
            Err(SolverError::JacobianSingular) => return Ok(false),
            Err(e) => return Err(e),
        }
        self.refresh_jacobian()?;
        match self.lu.factor(&self.jac) {
            Ok(()) => Ok(true),
            Err(SolverError::JacobianSingular) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Replace J by forward differences at `x`. On error J is unchanged.
    fn refresh_jacobian(&mut self) -> Result<(), SolverError> {
        log::debug!(
            "recomputing the Jacobian by finite differences (stale = {})",
            self.estimator.is_stale()
        );
        let mut evaluations = self.evaluations;
        self.estimator.estimate(
            &self.system,
            &self.x,
            &self.f,
            &mut self.jac_trial,
            &mut evaluations,
        )?;
        self.evaluations = evaluations;
        std::mem::swap(&mut self.jac, &mut self.jac_trial);
        self.update_diag();
        Ok(())
    }

    /// Scaling only ever grows, towards the column norms of J.
    fn update_diag(&mut self) {
        if !self.config.scaled {
            return;
        }
        let norms = self.jac.column_norms();
        for (d, c) in self.diag.iter_mut().zip(norms.iter()) {
            *d = libm::fmax(*d, *c);
        }
    }

    fn update_radius(&mut self, rho: f64, pnorm: f64) {
        let cfg = &self.config;
        let old = self.delta;
        let mut delta = self.delta;
        if rho < cfg.shrink_threshold {
            self.ncsuc = 0;
            delta *= cfg.shrink_factor;
        } else {
            self.ncsuc += 1;
            if rho >= cfg.expand_threshold || self.ncsuc > 1 {
                delta = libm::fmax(delta, cfg.expand_factor * pnorm);
            }
            if (rho - 1.0).abs() <= cfg.shrink_threshold {
                delta = cfg.expand_factor * pnorm;
            }
        }
        self.delta = self.clamp_delta(delta);
        if self.delta < old {
            log::debug!("shrink delta from {old} to {}", self.delta);
        } else if self.delta > old {
            log::debug!("expand delta from {old} to {}", self.delta);
        }
    }

    fn clamp_delta(&self, delta: f64) -> f64 {
        delta.clamp(self.config.delta_min, self.config.delta_max)
    }

    /// Current point.
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Residuals at the current point.
    pub fn f(&self) -> &[f64] {
        &self.f
    }

    /// The last proposed step, whether or not it was accepted.
    pub fn dx(&self) -> &[f64] {
        &self.dx
    }

    /// Current Jacobian approximation.
    pub fn jacobian(&self) -> &Matrix {
        &self.jac
    }

    /// Variable scaling. All ones when scaling is off.
    pub fn scaling(&self) -> &[f64] {
        &self.diag
    }

    /// Trust-region radius.
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Iterations taken since the last [`Solver::set`].
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Function evaluations since the last [`Solver::set`], including
    /// finite differences.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Which kind of step the last iteration proposed.
    pub fn last_step(&self) -> Option<StepKind> {
        self.last_step
    }

    /// Euclidean norm of the residuals.
    pub fn residual_norm(&self) -> f64 {
        self.f.norm()
    }

    /// The configuration this solver was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The system being solved.
    pub fn system(&self) -> &S {
        &self.system
    }

    /// Give the system back.
    pub fn into_system(self) -> S {
        self.system
    }
}
