/// Verdict of a convergence test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Convergence {
    /// Keep iterating.
    Continue,
    /// The test passed.
    Success,
}

impl Convergence {
    /// Did the test pass?
    pub fn is_success(self) -> bool {
        self == Convergence::Success
    }
}

/// Residual test: succeeds when the sum of absolute residuals is at most `tol`.
///
/// A NaN anywhere in `f` never succeeds.
///
/// ```
/// use multiroot::{Convergence, test_residual};
///
/// assert_eq!(test_residual(&[1e-9, -1e-9], 1e-7), Convergence::Success);
/// assert_eq!(test_residual(&[0.1, 0.0], 1e-7), Convergence::Continue);
/// ```
pub fn test_residual(f: &[f64], tol: f64) -> Convergence {
    let sum: f64 = f.iter().map(|v| v.abs()).sum();
    if sum <= tol {
        Convergence::Success
    } else {
        Convergence::Continue
    }
}

/// Step-size test: succeeds when every component of the last step satisfies
/// `|dx_i| < epsabs + epsrel * |x_i|`.
///
/// With both tolerances zero the test can never pass.
pub fn test_delta(dx: &[f64], x: &[f64], epsabs: f64, epsrel: f64) -> Convergence {
    debug_assert_eq!(dx.len(), x.len());
    let small = dx
        .iter()
        .zip(x)
        .all(|(d, xi)| d.abs() < epsabs + epsrel * xi.abs());
    if small {
        Convergence::Success
    } else {
        Convergence::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residual_boundary_is_inclusive() {
        assert_eq!(test_residual(&[0.5, -0.5], 1.0), Convergence::Success);
        assert_eq!(test_residual(&[0.5, -0.6], 1.0), Convergence::Continue);
        assert_eq!(test_residual(&[], 0.0), Convergence::Success);
    }

    #[test]
    fn nan_never_converges() {
        assert_eq!(test_residual(&[f64::NAN], 1.0), Convergence::Continue);
        assert_eq!(
            test_residual(&[0.0, f64::NAN], f64::INFINITY),
            Convergence::Continue
        );
    }

    #[test]
    fn step_test() {
        let x = [100.0, 1.0];
        assert!(test_delta(&[1e-5, 1e-7], &x, 1e-6, 1e-6).is_success());
        assert!(!test_delta(&[1e-3, 0.0], &x, 1e-6, 1e-6).is_success());
        // Strict inequality.
        assert!(!test_delta(&[1.0, 0.0], &[0.0, 0.0], 1.0, 0.0).is_success());
        // Disabled when both tolerances are zero.
        assert!(!test_delta(&[0.0, 0.0], &x, 0.0, 0.0).is_success());
    }
}
