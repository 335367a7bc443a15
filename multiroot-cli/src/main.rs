use std::io::{self, Write};

use anyhow::Context;
use clap::Parser;
use multiroot::{
    Config, Control, FailureOutcome, IterationStats, SolveOutcome,
    problems::{ROSENBROCK_GUESS, RosenbrockParams, rosenbrock},
    solve_cb,
};

mod logger;

#[derive(Parser)]
#[command(name = "multiroot", version, about, long_about = None)]
struct Cli {
    /// Weight `a` in f0 = a (1 - x0).
    #[arg(short = 'a', default_value_t = 1.0, allow_negative_numbers = true)]
    a: f64,

    /// Weight `b` in f1 = b (x1 - x0^2).
    #[arg(short = 'b', default_value_t = 10.0, allow_negative_numbers = true)]
    b: f64,

    /// Initial guess.
    #[arg(
        long,
        num_args = 2,
        value_names = ["X0", "X1"],
        default_values_t = ROSENBROCK_GUESS,
        allow_negative_numbers = true
    )]
    guess: Vec<f64>,

    /// Stop once the sum of absolute residuals is at most this.
    #[arg(long, default_value_t = 1e-7, allow_negative_numbers = true)]
    tol: f64,

    /// Give up after this many iterations.
    #[arg(long = "max-iter", default_value_t = 1000)]
    max_iter: usize,

    /// Measure the trust region in the original variables.
    #[arg(long, default_value_t = false)]
    unscaled: bool,

    /// Also stop once every step component is below this,
    /// absolutely or relative to the current point.
    #[arg(long = "step-tol")]
    step_tol: Option<f64>,

    /// Print the solver's debug log to stderr.
    #[arg(short = 'v', long, default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::default()
            .with_scaling(!self.unscaled)
            .with_tol(self.tol)
            .with_max_iter(self.max_iter);
        if let Some(step_tol) = self.step_tol {
            config = config.with_step_tol(step_tol, step_tol);
        }
        config
    }
}

fn main() {
    let cli = Cli::parse();
    if cli.verbose
        && let Err(e) = logger::init(log::LevelFilter::Debug)
    {
        eprintln!("Error: {e}");
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = main_inner(&cli, &mut out).and_then(|outcome| {
        print_outcome(&mut out, &outcome)?;
        Ok(())
    });
    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

type RunResult = Result<SolveOutcome, FailureOutcome>;

/// Solve the Rosenbrock system described by `cli`, writing a trace line per iteration.
/// Solver failures are part of the result; only bad settings and I/O errors are errors.
fn main_inner(cli: &Cli, out: &mut impl Write) -> anyhow::Result<RunResult> {
    let config = cli.config();
    config.validate().context("Invalid solver settings")?;
    let params = RosenbrockParams { a: cli.a, b: cli.b };

    let mut write_error = None;
    let outcome = solve_cb(rosenbrock(&params), &cli.guess, config, |stats| {
        match writeln!(out, "{}", trace_line(stats)) {
            Ok(()) => Control::Continue,
            Err(e) => {
                write_error = Some(e);
                Control::Cancel
            }
        }
    });
    if let Some(e) = write_error {
        return Err(e).context("Could not write the iteration trace");
    }
    Ok(outcome)
}

/// `[ iter = 003 ] x =  1.000 -0.500 / f(x) =  0.000e+00 -1.500e+01`
fn trace_line(stats: &IterationStats<'_>) -> String {
    let xs: Vec<_> = stats.x.iter().map(|&v| fixed(v)).collect();
    let fs: Vec<_> = stats.f.iter().map(|&v| scientific(v)).collect();
    format!(
        "[ iter = {:03} ] x = {} / f(x) = {}",
        stats.iter,
        xs.join(" "),
        fs.join(" ")
    )
}

/// Three decimals, with a space where a minus sign would go.
fn fixed(v: f64) -> String {
    if v.is_sign_negative() {
        format!("{v:.3}")
    } else {
        format!(" {v:.3}")
    }
}

/// Three-decimal scientific notation with a signed, two-digit exponent.
fn scientific(v: f64) -> String {
    let s = format!("{v:.3e}");
    let sign = if v.is_sign_negative() { "" } else { " " };
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (exp_sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{sign}{mantissa}e{exp_sign}{digits:0>2}")
        }
        // inf and NaN
        None => format!("{sign}{s}"),
    }
}

fn print_outcome(out: &mut impl Write, outcome: &RunResult) -> io::Result<()> {
    use colored::Colorize;
    match outcome {
        Ok(solved) => {
            writeln!(out, "status = {}", "success".green())?;
            writeln!(
                out,
                "Iterations needed: {}, function evaluations: {}",
                solved.iterations(),
                solved.evaluations()
            )?;
            let xs: Vec<_> = solved.x().iter().map(|v| format!("{v:.6}")).collect();
            writeln!(out, "Root: ({})", xs.join(", "))
        }
        Err(failure) => print_failure_output(out, failure),
    }
}

fn print_failure_output(out: &mut impl Write, failure: &FailureOutcome) -> io::Result<()> {
    use colored::Colorize;
    let status = match failure.error.status() {
        Some(status) => status.to_string(),
        None => failure.error.to_string(),
    };
    writeln!(out, "status = {}", status.red())?;
    writeln!(
        out,
        "Stopped after {} iterations and {} function evaluations",
        failure.iterations, failure.evaluations
    )?;
    let xs: Vec<_> = failure.x().iter().map(|v| format!("{v:.6}")).collect();
    writeln!(out, "Last point: ({})", xs.join(", "))
}
