use proptest::prelude::*;

use crate::{
    Config, Convergence, Solver, Status,
    problems::{RosenbrockParams, rosenbrock},
    solve, test_residual,
    tests::{assert_nearly_eq, trace},
};

proptest! {
    #[test]
    fn residual_test_is_idempotent(
        f in prop::collection::vec(-1e3f64..1e3, 1..8),
        tol in 0.0f64..10.0,
    ) {
        let first = test_residual(&f, tol);
        let second = test_residual(&f, tol);
        prop_assert_eq!(first, second);
        let sum: f64 = f.iter().map(|v| v.abs()).sum();
        prop_assert_eq!(first == Convergence::Success, sum <= tol);
    }

    #[test]
    fn rosenbrock_converges_from_anywhere(
        x0 in -50.0f64..50.0,
        x1 in -50.0f64..50.0,
        scaled in any::<bool>(),
    ) {
        let params = RosenbrockParams::default();
        let config = Config::default().with_scaling(scaled);
        let outcome = solve(rosenbrock(&params), &[x0, x1], config).unwrap();
        assert_nearly_eq(outcome.x()[0], 1.0, 1e-6);
        assert_nearly_eq(outcome.x()[1], 1.0, 1e-6);
    }

    #[test]
    fn radius_stays_in_bounds(
        x0 in -20.0f64..20.0,
        x1 in -20.0f64..20.0,
        a in 0.5f64..5.0,
        b in 1.0f64..50.0,
        scaled in any::<bool>(),
    ) {
        let params = RosenbrockParams { a, b };
        let config = Config::default().with_scaling(scaled);
        let (delta_min, delta_max) = (config.delta_min, config.delta_max);
        let mut solver = Solver::new(rosenbrock(&params), &[x0, x1], config).unwrap();
        let mut last = solver.residual_norm();
        for _ in 0..200 {
            let status = solver.iterate().unwrap();
            prop_assert!(solver.delta() > 0.0);
            prop_assert!(solver.delta() >= delta_min);
            prop_assert!(solver.delta() <= delta_max);
            // x only moves on accepted steps, and those reduce |f|.
            prop_assert!(solver.residual_norm() <= last);
            last = solver.residual_norm();
            if status != Status::Continue {
                break;
            }
        }
    }

    #[test]
    fn identical_inputs_give_identical_traces(
        x0 in -20.0f64..20.0,
        x1 in -20.0f64..20.0,
        scaled in any::<bool>(),
    ) {
        let params = RosenbrockParams::default();
        let config = Config::default().with_scaling(scaled);
        let first = trace(rosenbrock(&params), &[x0, x1], config.clone());
        let second = trace(rosenbrock(&params), &[x0, x1], config);
        prop_assert_eq!(first, second);
    }
}
