use crate::{EvalError, Vector};

/// A square system of equations F: R^n -> R^n whose root we want.
///
/// Implementations must be pure: the solver evaluates trial points
/// speculatively and throws most of them away.
pub trait NonlinearSystem {
    /// Number of unknowns, which is also the number of equations.
    fn dimension(&self) -> usize;

    /// Write F(x) into `out`. Both slices have length [`Self::dimension`].
    fn residual(&self, x: &[f64], out: &mut [f64]) -> Result<(), EvalError>;

    /// Evaluate F(x) into a fresh vector, checking the length of `x` first.
    fn evaluate(&self, x: &[f64]) -> Result<Vector, EvalError> {
        let mut out = Vector::zeros(self.dimension());
        evaluate_into(self, x, &mut out)?;
        Ok(out)
    }
}

impl<S: NonlinearSystem + ?Sized> NonlinearSystem for &S {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn residual(&self, x: &[f64], out: &mut [f64]) -> Result<(), EvalError> {
        (**self).residual(x, out)
    }
}

/// Length-checked evaluation into a caller-owned buffer.
pub(crate) fn evaluate_into<S: NonlinearSystem + ?Sized>(
    system: &S,
    x: &[f64],
    out: &mut [f64],
) -> Result<(), EvalError> {
    let expected = system.dimension();
    if x.len() != expected {
        return Err(EvalError::WrongDimension {
            expected,
            got: x.len(),
        });
    }
    debug_assert_eq!(out.len(), expected);
    system.residual(x, out)
}

/// A system built from a closure plus parameters borrowed for the whole solve.
///
/// ```
/// use multiroot::{EvalError, Function, NonlinearSystem};
///
/// // x^2 = c, one unknown.
/// let c = 4.0;
/// let square = Function::new(1, &c, |x: &[f64], c: &f64, out: &mut [f64]| {
///     out[0] = x[0] * x[0] - c;
///     Ok::<(), EvalError>(())
/// });
/// let f = square.evaluate(&[3.0]).unwrap();
/// assert_eq!(f[0], 5.0);
/// ```
pub struct Function<'p, P: ?Sized, F> {
    dimension: usize,
    params: &'p P,
    f: F,
}

impl<'p, P: ?Sized, F> Function<'p, P, F>
where
    F: Fn(&[f64], &P, &mut [f64]) -> Result<(), EvalError>,
{
    /// Wrap `f`, a system of `dimension` equations parameterised by `params`.
    pub fn new(dimension: usize, params: &'p P, f: F) -> Self {
        Self {
            dimension,
            params,
            f,
        }
    }

    /// The parameters this function was built with.
    pub fn params(&self) -> &'p P {
        self.params
    }
}

impl<P: ?Sized, F> NonlinearSystem for Function<'_, P, F>
where
    F: Fn(&[f64], &P, &mut [f64]) -> Result<(), EvalError>,
{
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn residual(&self, x: &[f64], out: &mut [f64]) -> Result<(), EvalError> {
        (self.f)(x, self.params, out)
    }
}

impl<P: ?Sized, F> std::fmt::Debug for Function<'_, P, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::bits;

    fn shifted(x: &[f64], shift: &f64, out: &mut [f64]) -> Result<(), EvalError> {
        if x[0] < 0.0 {
            return Err(EvalError::Domain("x0 must be non-negative".to_owned()));
        }
        out[0] = x[0] - shift;
        out[1] = x[1] + shift;
        Ok(())
    }

    #[test]
    fn evaluate_checks_length() {
        let shift = 1.5;
        let system = Function::new(2, &shift, shifted);
        assert_eq!(
            system.evaluate(&[1.0]),
            Err(EvalError::WrongDimension {
                expected: 2,
                got: 1
            })
        );
        let f = system.evaluate(&[1.0, 1.0]).unwrap();
        assert_eq!(bits(&f), bits(&[-0.5, 2.5]));
    }

    #[test]
    fn domain_errors_pass_through() {
        let shift = 0.0;
        let system = Function::new(2, &shift, shifted);
        assert!(matches!(
            system.evaluate(&[-1.0, 0.0]),
            Err(EvalError::Domain(_))
        ));
    }

    #[test]
    fn borrowed_systems_are_systems() {
        fn dim_of(system: impl NonlinearSystem) -> usize {
            system.dimension()
        }
        let shift = 0.0;
        let system = Function::new(2, &shift, shifted);
        assert_eq!(dim_of(&system), 2);
        assert_eq!(dim_of(&&system), 2);
        assert!((system.params() - 0.0).abs() < f64::EPSILON);
    }
}
