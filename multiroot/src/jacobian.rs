use crate::{EvalError, Matrix, NonlinearSystem, Vector, system::evaluate_into};

/// Keeps the Jacobian approximation up to date.
///
/// The approximation starts from forward differences and is then carried
/// along by Broyden rank-one updates, which cost no extra evaluations.
/// When the updates stop being trustworthy the solver asks for a fresh
/// finite-difference estimate.
#[derive(Debug)]
pub(crate) struct JacobianEstimator {
    fd_step: f64,
    /// True while the matrix was differenced at the current point.
    fresh: bool,
    /// A Broyden update had to be skipped, so J no longer matches the secant.
    stale: bool,
    x_pert: Vector,
    f_pert: Vector,
    scratch: Vector,
}

impl JacobianEstimator {
    pub fn new(n: usize, fd_step: f64) -> Self {
        Self {
            fd_step,
            fresh: false,
            stale: false,
            x_pert: Vector::zeros(n),
            f_pert: Vector::zeros(n),
            scratch: Vector::zeros(n),
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Should J be rebuilt by finite differences after a rejected step?
    /// Never when it was already differenced at this point.
    pub fn needs_refresh(&self, consecutive_failures: usize, limit: usize) -> bool {
        !self.fresh && (self.stale || consecutive_failures >= limit)
    }

    /// Forward-difference estimate of J at `x`, where `f = F(x)`.
    /// Costs n evaluations, added to `evaluations`.
    pub fn estimate<S: NonlinearSystem + ?Sized>(
        &mut self,
        system: &S,
        x: &[f64],
        f: &[f64],
        jac: &mut Matrix,
        evaluations: &mut usize,
    ) -> Result<(), EvalError> {
        self.x_pert.copy_from(x);
        for j in 0..x.len() {
            let xj = x[j];
            let h = self.fd_step * libm::fmax(xj.abs(), 1.0);
            // Use the step that is actually representable.
            let h = (xj + h) - xj;
            self.x_pert[j] = xj + h;
            let evaluated = evaluate_into(system, &self.x_pert, &mut self.f_pert);
            self.x_pert[j] = xj;
            evaluated?;
            *evaluations += 1;

            for (s, (fp, f0)) in self.scratch.iter_mut().zip(self.f_pert.iter().zip(f)) {
                *s = (fp - f0) / h;
            }
            jac.set_column(j, &self.scratch);
        }
        self.fresh = true;
        self.stale = false;
        Ok(())
    }

    /// Broyden's update J += (df - J dx) dx^T / (dx . dx).
    /// Returns false, and marks J stale, when dx is too small to divide by.
    pub fn update(&mut self, jac: &mut Matrix, dx: &[f64], df: &[f64]) -> bool {
        let dx_dot = dx.iter().map(|v| v * v).sum::<f64>();
        if dx_dot.is_nan() || dx_dot <= f64::MIN_POSITIVE {
            log::debug!("Broyden update skipped, |dx|^2 = {dx_dot:e}");
            self.stale = true;
            return false;
        }
        jac.mul_vec(dx, &mut self.scratch);
        for (s, d) in self.scratch.iter_mut().zip(df) {
            *s = d - *s;
        }
        jac.rank_one_update(1.0 / dx_dot, &self.scratch, dx);
        self.fresh = false;
        true
    }
}
