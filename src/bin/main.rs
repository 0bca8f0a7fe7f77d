//! chunksvm command line interface
//!
//! Trains on a JSON problem file and writes a JSON report with the model and
//! the run diagnostics.

use chunksvm::api::SVM;
use chunksvm::core::{Result, SolverConfig, Termination};
use chunksvm::persistence::{ProblemFile, TrainingReport};
use chunksvm::solver::Problem;
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "chunksvm")]
#[command(about = "Chunking decomposition solver for kernel SVMs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on a problem file
    Train(TrainArgs),
    /// Print the default solver configuration as JSON
    Config(ConfigArgs),
    /// Summarize a training report
    Info(InfoArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// Problem file (labels plus kernel matrix or points)
    #[arg(short, long)]
    problem: PathBuf,

    /// Solver configuration file; command line flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Report file (prints to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Regularization parameter C
    #[arg(short = 'C', long)]
    c: Option<f64>,

    /// Convergence tolerance on the KKT conditions
    #[arg(short, long)]
    epsilon: Option<f64>,

    /// Maximum QP subproblem size
    #[arg(short, long)]
    qp_size: Option<usize>,

    /// Train without the equality constraint (no bias)
    #[arg(long)]
    no_bias: bool,

    /// Disable shrinking
    #[arg(long)]
    no_shrinking: bool,

    /// Worker threads (0 = available parallelism)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Kernel cache size in kernel elements
    #[arg(long)]
    cache_size: Option<usize>,

    /// Maximum outer iterations
    #[arg(short, long)]
    max_iterations: Option<usize>,

    /// Wall-clock budget in seconds
    #[arg(long)]
    max_time: Option<f64>,
}

#[derive(Args)]
struct ConfigArgs {
    /// Write to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct InfoArgs {
    /// Report file
    report: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let result = match cli.command {
        Commands::Train(args) => train_command(args),
        Commands::Config(args) => config_command(args),
        Commands::Info(args) => info_command(args),
    };

    if let Err(e) = result {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn solver_config(args: &TrainArgs) -> Result<SolverConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {path:?}");
            SolverConfig::from_json_file(path)?
        }
        None => SolverConfig::default(),
    };
    if let Some(c) = args.c {
        config.c = c;
    }
    if let Some(epsilon) = args.epsilon {
        config.epsilon = epsilon;
    }
    if let Some(qp_size) = args.qp_size {
        config.qp_size = qp_size;
        if config.new_vars_in_qp.is_some_and(|n| n > qp_size) {
            config.new_vars_in_qp = Some(qp_size);
        }
    }
    if args.no_bias {
        config.bias = false;
    }
    if args.no_shrinking {
        config.shrinking = false;
    }
    if let Some(threads) = args.threads {
        config.num_threads = threads;
    }
    if let Some(cache_size) = args.cache_size {
        config.cache_size = cache_size;
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(max_time) = args.max_time {
        config.max_train_time_secs = Some(max_time);
    }
    config.validate()?;
    Ok(config)
}

fn train_command(args: TrainArgs) -> Result<()> {
    let config = solver_config(&args)?;
    info!("Loading problem from: {:?}", args.problem);
    let file = ProblemFile::load_from_file(&args.problem)?;
    let kernel = file.kernel.build()?;
    info!(
        "Loaded {} examples with a {} kernel",
        file.labels.len(),
        file.kernel.name()
    );

    let mut problem = Problem::new(kernel.as_ref(), &file.labels);
    if let Some(weights) = &file.weights {
        problem = problem.with_weights(weights);
    }
    if let Some(linear_term) = &file.linear_term {
        problem = problem.with_linear_term(linear_term);
    }
    if let Some(alpha) = &file.initial_alpha {
        problem = problem.with_initial_alpha(alpha);
    }

    let result = SVM::with_config(config.clone()).train_problem(&problem)?;
    let diagnostics = &result.diagnostics;
    if diagnostics.termination != Termination::Converged {
        warn!(
            "Training ended without full convergence: {:?}",
            diagnostics.termination
        );
    }
    info!(
        "Support vectors: {} ({} at upper bound)",
        diagnostics.n_support_vectors, diagnostics.n_at_upper_bound
    );
    info!("Bias: {:.6}", result.model.bias);

    let report = TrainingReport::new(&result, &config, file.kernel.name());
    match args.output {
        Some(path) => {
            report.save_to_file(&path)?;
            info!("Report saved to: {path:?}");
        }
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            report.to_writer(&mut handle)?;
            writeln!(handle)?;
        }
    }
    Ok(())
}

fn config_command(args: ConfigArgs) -> Result<()> {
    let json = serde_json::to_string_pretty(&SolverConfig::default())?;
    match args.output {
        Some(path) => std::fs::write(&path, json + "\n")?,
        None => println!("{json}"),
    }
    Ok(())
}

fn info_command(args: InfoArgs) -> Result<()> {
    let report = TrainingReport::load_from_file(&args.report)?;
    let diagnostics = &report.diagnostics;

    println!("=== Training Report ===");
    println!("Created: {}", report.metadata.created_at);
    println!("Library Version: {}", report.metadata.library_version);
    println!("Kernel: {}", report.metadata.kernel);
    println!("Examples: {}", report.metadata.n_examples);
    println!("C: {}", report.metadata.config.c);
    println!("\nResult:");
    println!("  Termination:     {:?}", diagnostics.termination);
    println!("  Iterations:      {}", diagnostics.iterations);
    println!("  Objective:       {:.8}", diagnostics.objective);
    println!("  Max violation:   {:.3e}", diagnostics.max_violation);
    println!(
        "  Support vectors: {} ({} at upper bound)",
        diagnostics.n_support_vectors, diagnostics.n_at_upper_bound
    );
    println!("  Bias:            {:.6}", report.model.bias);
    println!(
        "  Cache hit rate:  {:.1}%",
        100.0 * diagnostics.cache.hit_rate()
    );
    if let Some(weights) = &diagnostics.mkl_weights {
        println!("  Kernel weights:  {weights:?}");
    }
    Ok(())
}
