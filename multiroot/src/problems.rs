//! Standard test systems.

use crate::{EvalError, Function};

/// The usual starting point for [`rosenbrock`].
pub const ROSENBROCK_GUESS: [f64; 2] = [-10.0, -5.0];

/// Parameters of the Rosenbrock system.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RosenbrockParams {
    /// Weight of the first equation.
    pub a: f64,
    /// Weight of the second equation, which sets how curved the valley is.
    pub b: f64,
}

impl Default for RosenbrockParams {
    fn default() -> Self {
        Self { a: 1.0, b: 10.0 }
    }
}

/// Residuals of the Rosenbrock system:
/// `f0 = a (1 - x0)`, `f1 = b (x1 - x0^2)`. The root is (1, 1) for any nonzero a and b.
pub fn rosenbrock_residual(
    x: &[f64],
    params: &RosenbrockParams,
    out: &mut [f64],
) -> Result<(), EvalError> {
    let RosenbrockParams { a, b } = *params;
    out[0] = a * (1.0 - x[0]);
    out[1] = b * (x[1] - x[0] * x[0]);
    Ok(())
}

/// Plain function pointer form of a residual function.
pub type ResidualFn<P> = fn(&[f64], &P, &mut [f64]) -> Result<(), EvalError>;

/// The Rosenbrock system as something the solver can run.
pub type Rosenbrock<'p> = Function<'p, RosenbrockParams, ResidualFn<RosenbrockParams>>;

/// Build the Rosenbrock system for these parameters.
pub fn rosenbrock(params: &RosenbrockParams) -> Rosenbrock<'_> {
    Function::new(2, params, rosenbrock_residual as ResidualFn<RosenbrockParams>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NonlinearSystem, tests::bits};

    #[test]
    fn residual_at_guess_and_root() {
        let params = RosenbrockParams::default();
        let system = rosenbrock(&params);
        let f = system.evaluate(&ROSENBROCK_GUESS).unwrap();
        // a (1 + 10) and b (-5 - 100)
        assert_eq!(bits(&f), bits(&[11.0, -1050.0]));
        let f = system.evaluate(&[1.0, 1.0]).unwrap();
        assert_eq!(bits(&f), bits(&[0.0, 0.0]));
    }
}
