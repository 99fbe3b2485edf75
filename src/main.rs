use clap::Parser;
use std::process::exit;
use synth_shortest_prog::{spec, synthesize, Error, Options};

/// Synthesize the shortest straight-line bit-vector program for a built-in
/// specification.
///
/// The program is printed on standard output; progress goes to standard
/// error. Exit codes: 0 success, 1 unsynthesizable within the bound, 2
/// solver timeout or unexpected result, 3 internal error.
#[derive(Parser)]
#[command(name = "synth-shortest-prog", version)]
struct Cli {
    /// Specification to synthesize, by registry name
    #[arg(default_value = "is-power-of-two-or-zero")]
    spec: String,
    /// Give up once programs of N instructions have been ruled out
    #[arg(long, value_name = "N")]
    max_insns: Option<usize>,
    /// Per-query solver timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u32>,
    /// Random seed handed to the solver
    #[arg(long, value_name = "SEED")]
    seed: Option<u32>,
    /// Suppress progress output on standard error
    #[arg(long, short)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.quiet { "error" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    let spec = match spec::lookup(&cli.spec) {
        Some(spec) => spec,
        None => {
            eprintln!(
                "unknown specification `{}`; available: {}",
                cli.spec,
                spec::names().join(", ")
            );
            return 3;
        }
    };

    let options = Options {
        max_insns: cli.max_insns,
        timeout_ms: cli.timeout_ms,
        seed: cli.seed,
        ..Options::default()
    };

    match synthesize(spec.as_ref(), &options) {
        Ok(program) => {
            print!("{}", program);
            0
        }
        Err(err @ Error::BoundExceeded(_)) => {
            eprintln!("{}", err);
            1
        }
        Err(err @ (Error::SolverUnknown { .. } | Error::ModelDecode(_))) => {
            eprintln!("{}", err);
            2
        }
        Err(err) => {
            eprintln!("{}", err);
            3
        }
    }
}
