//! Drive the solver by hand, printing each iterate.
use multiroot::{
    Config, Solver, Status,
    problems::{ROSENBROCK_GUESS, RosenbrockParams, rosenbrock},
};

fn main() {
    let params = RosenbrockParams::default();
    let mut solver = match Solver::new(rosenbrock(&params), &ROSENBROCK_GUESS, Config::scaled()) {
        Ok(solver) => solver,
        Err(e) => {
            eprintln!("could not start the solver: {e}");
            return;
        }
    };

    loop {
        let x = solver.x();
        let f = solver.f();
        println!(
            "iter {:3}: x = ({:+.6}, {:+.6}), f = ({:+.3e}, {:+.3e})",
            solver.iterations(),
            x[0],
            x[1],
            f[0],
            f[1]
        );
        match solver.iterate() {
            Ok(Status::Continue) => {}
            Ok(status) => {
                println!(
                    "{status} at ({}, {}) after {} evaluations",
                    solver.x()[0],
                    solver.x()[1],
                    solver.evaluations()
                );
                break;
            }
            Err(e) => {
                eprintln!("solver failed: {e}");
                break;
            }
        }
    }
}
