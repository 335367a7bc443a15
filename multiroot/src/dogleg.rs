use crate::{Matrix, SolverError, Vector, linalg::DenseLu};

/// Which branch of the dogleg produced the last step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// The full Newton step fit inside the trust region.
    Newton,
    /// The gradient vanished, so the Newton direction was cut back to the boundary.
    ScaledNewton,
    /// The Cauchy point was outside the region; steepest descent to the boundary.
    SteepestDescent,
    /// A point on the segment between the Cauchy point and the Newton step.
    Dogleg,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepKind::Newton => "newton",
            StepKind::ScaledNewton => "scaled newton",
            StepKind::SteepestDescent => "steepest descent",
            StepKind::Dogleg => "dogleg",
        };
        f.write_str(name)
    }
}

/// Scratch space for the dogleg step, allocated once per solver.
#[derive(Debug)]
pub(crate) struct Dogleg {
    newton: Vector,
    gradient: Vector,
    cauchy: Vector,
    j_cauchy: Vector,
}

impl Dogleg {
    pub fn new(n: usize) -> Self {
        Self {
            newton: Vector::zeros(n),
            gradient: Vector::zeros(n),
            cauchy: Vector::zeros(n),
            j_cauchy: Vector::zeros(n),
        }
    }

    /// Approximately minimize ||f + J p|| subject to ||D p|| <= delta,
    /// writing p into `step`. `lu` must hold the factorization of `jac`.
    pub fn compute(
        &mut self,
        lu: &DenseLu,
        jac: &Matrix,
        f: &[f64],
        diag: &[f64],
        delta: f64,
        step: &mut Vector,
    ) -> Result<StepKind, SolverError> {
        // Gauss-Newton step.
        self.newton.copy_from(f);
        self.newton.scale(-1.0);
        lu.solve_in_place(&mut self.newton)?;
        let newton_norm = self.newton.scaled_norm(diag);
        if newton_norm <= delta {
            step.copy_from(&self.newton);
            log::debug!("take full Newton: {:?}", step.as_slice());
            return Ok(StepKind::Newton);
        }

        // Steepest-descent direction of 1/2 ||f + J p||^2 at p = 0.
        jac.tr_mul_vec(f, &mut self.gradient);
        self.gradient.scale(-1.0);
        if self.gradient.norm_inf() == 0.0 {
            step.copy_from(&self.newton);
            step.scale(delta / newton_norm);
            log::debug!("gradient vanished, take scaled Newton: {:?}", step.as_slice());
            return Ok(StepKind::ScaledNewton);
        }

        // Cauchy point: minimizer of the model along D^-2 g.
        for ((c, g), d) in self.cauchy.iter_mut().zip(self.gradient.iter()).zip(diag) {
            *c = g / (d * d);
        }
        jac.mul_vec(&self.cauchy, &mut self.j_cauchy);
        let curvature = self.j_cauchy.norm_squared();
        if !curvature.is_normal() {
            step.copy_from(&self.newton);
            step.scale(delta / newton_norm);
            log::debug!("no curvature along the gradient, take scaled Newton");
            return Ok(StepKind::ScaledNewton);
        }
        let tau = self.gradient.dot(&self.cauchy) / curvature;
        self.cauchy.scale(tau);
        let cauchy_norm = self.cauchy.scaled_norm(diag);

        if cauchy_norm >= delta {
            step.copy_from(&self.cauchy);
            step.scale(delta / cauchy_norm);
            log::debug!(
                "Cauchy point outside the region, take steepest descent: {:?}",
                step.as_slice()
            );
            return Ok(StepKind::SteepestDescent);
        }

        // Walk from the Cauchy point towards the Newton step until ||D p|| = delta.
        // `newton` becomes the segment direction.
        self.newton.axpy(-1.0, &self.cauchy);
        let diff = &self.newton;
        let a: f64 = diff
            .iter()
            .zip(diag)
            .map(|(v, d)| (v * d).powi(2))
            .sum();
        let b: f64 = diff
            .iter()
            .zip(self.cauchy.iter())
            .zip(diag)
            .map(|((v, c), d)| d * d * c * v)
            .sum();
        let c = (delta - cauchy_norm) * (delta + cauchy_norm);
        let disc = (b * b + a * c).sqrt();
        // Pick the form without cancellation.
        let alpha = if b <= 0.0 { (disc - b) / a } else { c / (b + disc) };

        step.copy_from(&self.cauchy);
        step.axpy(alpha, diff);
        log::debug!("take dogleg (factor = {alpha}): {:?}", step.as_slice());
        Ok(StepKind::Dogleg)
    }
}
