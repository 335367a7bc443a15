use super::*;
use crate::problems::{ROSENBROCK_GUESS, RosenbrockParams, rosenbrock};

mod proptests;

#[track_caller]
pub(crate) fn assert_nearly_eq(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {expected}, got {actual} (tolerance {tol})"
    );
}

/// Floats as bits, for exact comparisons.
pub(crate) fn bits(v: &[f64]) -> Vec<u64> {
    v.iter().map(|v| v.to_bits()).collect()
}

/// Every iterate's point, residuals and radius, as bits.
pub(crate) fn trace(
    system: impl NonlinearSystem,
    x0: &[f64],
    config: Config,
) -> Vec<(Vec<u64>, Vec<u64>, u64)> {
    let mut out = Vec::new();
    let _ = solve_cb(system, x0, config, |stats| {
        out.push((
            bits(stats.x),
            bits(stats.f),
            stats.delta.to_bits(),
        ));
        Control::Continue
    });
    out
}

#[test]
fn rosenbrock_reference_run() {
    let params = RosenbrockParams::default();
    for config in [Config::default(), Config::scaled()] {
        let outcome = solve(rosenbrock(&params), &ROSENBROCK_GUESS, config.clone()).unwrap();
        assert_nearly_eq(outcome.x()[0], 1.0, 1e-6);
        assert_nearly_eq(outcome.x()[1], 1.0, 1e-6);
        assert!(outcome.f().iter().map(|v| v.abs()).sum::<f64>() <= 1e-7);
        assert_eq!(outcome.converged_by(), ConvergedBy::Residual);
        assert!(
            outcome.iterations() < 100,
            "took {} iterations with {config:?}",
            outcome.iterations()
        );
        // Two evaluations go into each finite-difference Jacobian.
        assert!(outcome.evaluations() >= outcome.iterations() + 3);
    }
}

#[test]
fn rosenbrock_other_parameters() {
    let params = RosenbrockParams { a: 2.0, b: 100.0 };
    let outcome = solve(rosenbrock(&params), &[-1.2, 1.0], Config::scaled()).unwrap();
    assert_nearly_eq(outcome.x()[0], 1.0, 1e-6);
    assert_nearly_eq(outcome.x()[1], 1.0, 1e-6);
}

#[test]
fn already_converged_guess_takes_no_iterations() {
    let params = RosenbrockParams::default();
    let mut stats = Vec::new();
    let outcome = solve_cb(rosenbrock(&params), &[1.0, 1.0], Config::default(), |s| {
        stats.push(s.iter);
        Control::Continue
    })
    .unwrap();
    assert_eq!(outcome.iterations(), 0);
    assert_eq!(bits(outcome.x()), bits(&[1.0, 1.0]));
    assert_eq!(stats, vec![0]);
}

#[test]
fn singular_system_is_reported() {
    // Both equations are the same, so J has rank 1 everywhere.
    let system = Function::new(2, &(), |x: &[f64], _: &(), out: &mut [f64]| {
        out[0] = x[0] - x[1];
        out[1] = x[0] - x[1];
        Ok(())
    });
    let failure = solve(&system, &[1.0, 0.0], Config::default()).unwrap_err();
    assert!(matches!(failure.error, SolverError::JacobianSingular));
    assert_eq!(failure.error.status(), Some(Status::JacobianSingular));
    assert_eq!(failure.iterations, 0);
    assert_eq!(bits(failure.x()), bits(&[1.0, 0.0]));

    let mut solver = Solver::new(&system, &[1.0, 0.0], Config::default()).unwrap();
    assert_eq!(solver.iterate().unwrap(), Status::JacobianSingular);
    assert_eq!(solver.iterate().unwrap(), Status::JacobianSingular);
}

#[test]
fn residual_norm_never_increases() {
    let params = RosenbrockParams::default();
    for config in [Config::default(), Config::scaled()] {
        let mut solver = Solver::new(rosenbrock(&params), &ROSENBROCK_GUESS, config).unwrap();
        let mut last = solver.residual_norm();
        while solver.iterate().unwrap() == Status::Continue {
            let now = solver.residual_norm();
            assert!(now <= last, "|f| went from {last} to {now}");
            last = now;
        }
        assert_eq!(solver.status(), Status::Success);
    }
}

#[test]
fn traces_are_reproducible() {
    let params = RosenbrockParams::default();
    for config in [Config::default(), Config::scaled()] {
        let a = trace(rosenbrock(&params), &ROSENBROCK_GUESS, config.clone());
        let b = trace(rosenbrock(&params), &ROSENBROCK_GUESS, config);
        assert!(a.len() > 1);
        assert_eq!(a, b);
    }
}

#[test]
fn unevaluable_trial_points_are_rejected_steps() {
    // The first Newton step from 10 lands at a negative x, where ln is NaN.
    let system = Function::new(1, &(), |x: &[f64], _: &(), out: &mut [f64]| {
        out[0] = x[0].ln();
        Ok(())
    });
    let outcome = solve(&system, &[10.0], Config::default()).unwrap();
    assert_nearly_eq(outcome.x()[0], 1.0, 1e-6);
}

#[test]
fn domain_errors_end_the_solve() {
    let system = Function::new(1, &(), |x: &[f64], _: &(), out: &mut [f64]| {
        if x[0] > 5.0 {
            return Err(EvalError::Domain(format!("{} is too big", x[0])));
        }
        out[0] = x[0] - 8.0;
        Ok(())
    });
    let failure = solve(&system, &[0.0], Config::default()).unwrap_err();
    assert!(matches!(
        failure.error,
        SolverError::Eval(EvalError::Domain(_))
    ));
    assert_eq!(bits(failure.x()), bits(&[0.0]));
    assert_eq!(failure.f().map(bits), Some(bits(&[-8.0])));
}

#[test]
fn badly_scaled_powell_system() {
    // Powell's badly scaled function; root near (1.098e-5, 9.106).
    let system = Function::new(2, &(), |x: &[f64], _: &(), out: &mut [f64]| {
        out[0] = 1e4 * x[0] * x[1] - 1.0;
        out[1] = (-x[0]).exp() + (-x[1]).exp() - 1.0001;
        Ok(())
    });
    let outcome = solve(&system, &[0.0, 1.0], Config::scaled().with_tol(1e-10)).unwrap();
    assert_nearly_eq(outcome.x()[0], 1.098e-5, 1e-8);
    assert_nearly_eq(outcome.x()[1], 9.106, 1e-3);
}

#[test]
fn broyden_tridiagonal() {
    let n = 5;
    let system = Function::new(n, &n, |x: &[f64], &n: &usize, out: &mut [f64]| {
        for i in 0..n {
            let left = if i > 0 { x[i - 1] } else { 0.0 };
            let right = if i + 1 < n { x[i + 1] } else { 0.0 };
            out[i] = (3.0 - 2.0 * x[i]) * x[i] - left - 2.0 * right + 1.0;
        }
        Ok(())
    });
    for config in [Config::default(), Config::scaled()] {
        let outcome = solve(&system, &vec![-1.0; n], config).unwrap();
        let f = system.evaluate(outcome.x()).unwrap();
        assert!(f.norm_l1() <= 1e-7);
    }
}

fn sqrt_two(x: &[f64], _: &(), out: &mut [f64]) -> Result<(), EvalError> {
    // No double squares to exactly 2, so the residual never reaches 0.
    out[0] = x[0] * x[0] - 2.0;
    Ok(())
}

#[test]
fn step_size_test_can_stop_the_solve() {
    let system = Function::new(1, &(), sqrt_two);
    let config = Config::default().with_tol(0.0).with_step_tol(1e-9, 0.0);
    let outcome = solve(&system, &[5.0], config).unwrap();
    assert_eq!(outcome.converged_by(), ConvergedBy::StepSize);
    assert_nearly_eq(outcome.x()[0], std::f64::consts::SQRT_2, 1e-12);
}

#[test]
fn unreachable_tolerance_means_no_progress() {
    let system = Function::new(1, &(), sqrt_two);
    let failure = solve(&system, &[5.0], Config::default().with_tol(0.0)).unwrap_err();
    assert!(matches!(failure.error, SolverError::NoProgress));
    assert_eq!(failure.error.status(), Some(Status::NoProgress));
    assert_nearly_eq(failure.x()[0], std::f64::consts::SQRT_2, 1e-12);
}

#[test]
fn iteration_budget() {
    let params = RosenbrockParams::default();
    let config = Config::default().with_max_iter(2);
    let failure = solve(rosenbrock(&params), &ROSENBROCK_GUESS, config).unwrap_err();
    assert!(matches!(
        failure.error,
        SolverError::MaxIterationsExceeded { max_iter: 2 }
    ));
    assert_eq!(failure.iterations, 2);
    assert_eq!(failure.error.status(), Some(Status::MaxIterExceeded));
}

#[test]
fn solvers_share_a_system() {
    let params = RosenbrockParams::default();
    let system = rosenbrock(&params);
    let guesses = [[-10.0, -5.0], [3.0, 3.0], [0.5, -2.0]];
    let roots: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = guesses
            .iter()
            .map(|guess| {
                let system = &system;
                s.spawn(move || solve(system, guess, Config::scaled()).map(|o| o.into_solution()))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for root in roots {
        let root = root.unwrap();
        assert_nearly_eq(root[0], 1.0, 1e-6);
        assert_nearly_eq(root[1], 1.0, 1e-6);
    }
}
