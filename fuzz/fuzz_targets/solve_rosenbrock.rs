#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use multiroot::{
    Config, DeltaInit, Solver,
    problems::{RosenbrockParams, rosenbrock},
};

// Whatever the parameters and guess, solving must end in an outcome, never a panic.
fuzz_target!(|setup: Setup| {
    let params = RosenbrockParams {
        a: setup.a,
        b: setup.b,
    };
    let mut config = Config::default()
        .with_scaling(setup.scaled)
        .with_max_iter(usize::from(setup.max_iter));
    if let Some(delta) = setup.delta {
        config = config.with_delta_init(DeltaInit::Fixed(delta));
    }
    let _ = multiroot::solve(rosenbrock(&params), &setup.guess, config.clone());

    // Stepping by hand must keep the radius in bounds.
    if let Ok(mut solver) = Solver::new(rosenbrock(&params), &setup.guess, config) {
        for _ in 0..setup.max_iter {
            let Ok(status) = solver.iterate() else { break };
            assert!(solver.delta() > 0.0);
            if status.is_terminal() {
                break;
            }
        }
    }
});

#[derive(Debug, Arbitrary)]
struct Setup {
    a: f64,
    b: f64,
    guess: Vec<f64>,
    scaled: bool,
    delta: Option<f64>,
    max_iter: u8,
}
