use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use omm_calc::catalog::Catalog;
use omm_calc::config::{self, Config};
use omm_calc::contract::{self, EvaluationRequest, EvaluationResponse, ScoreReport};
use omm_calc::output;
use omm_calc::scoring::{assess, EvaluationInput, FormulaSpec, Rejection};
use omm_calc::staged;

const EXIT_SUCCESS: i32 = 0;
const EXIT_INVALID_INPUT: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_CONFIG: i32 = 4;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Text,
    Json,
    Tsv,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List models and two-stage models (default if no subcommand)
    List,
    /// Show a model's variables, formula and classification bands
    Show {
        /// Model or two-stage model id
        id: String,
    },
    /// Evaluate a model from name=value pairs
    Eval {
        /// Model id
        id: String,
        /// Variable value, repeatable (e.g. -s hdl=1,2)
        #[arg(short = 's', long = "set", value_name = "NAME=VALUE")]
        values: Vec<String>,
        /// Use advertised defaults for variables not given
        #[arg(long)]
        defaults: bool,
        /// Show the per-term breakdown
        #[arg(long)]
        explain: bool,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Evaluate a model by answering one question per variable
    Ask {
        /// Model id
        id: String,
        /// Show the per-term breakdown
        #[arg(long)]
        explain: bool,
    },
    /// Evaluate a two-stage model
    Staged {
        /// Two-stage model id
        id: String,
        /// Stage 1 values
        #[arg(long, num_args = 1.., value_name = "NAME=VALUE", required = true)]
        first: Vec<String>,
        /// Stage 2 values, used only if stage 1 allows it
        #[arg(long, num_args = 1.., value_name = "NAME=VALUE")]
        second: Vec<String>,
        /// Show the per-term breakdown
        #[arg(long)]
        explain: bool,
    },
    /// Answer a JSON evaluation request read from FILE or stdin
    Request {
        file: Option<PathBuf>,
    },
    /// Load and validate every configured catalog
    Check,
}

#[derive(Parser, Debug)]
#[command(name = "omm-calc")]
#[command(about = "Clinical risk calculators driven by declarative formula tables", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to config file (defaults to ~/.config/omm-calc/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Settings shared by every command once config and catalog are loaded
struct Context {
    catalog: Catalog,
    config: Config,
    use_colors: bool,
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let command = cli.command.unwrap_or(Commands::List);

    let config_path = cli.config.map(PathBuf::from);
    let config = match config::load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {:#}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    // Validate config at startup
    if let Err(errors) = config::validate_config(&config) {
        eprintln!("Config errors:");
        for error in errors {
            eprintln!("  - {}", error);
        }
        std::process::exit(EXIT_CONFIG);
    }

    let catalog = match Catalog::load(&config.catalogs) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Catalog error: {:#}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    let ctx = Context {
        use_colors: output::should_use_colors(config.output.color),
        catalog,
        config,
    };

    let code = match command {
        Commands::List => {
            println!("{}", output::format_model_list(&ctx.catalog, ctx.use_colors));
            EXIT_SUCCESS
        }
        Commands::Show { id } => show(&ctx, &id),
        Commands::Eval {
            id,
            values,
            defaults,
            explain,
            format,
        } => eval(&ctx, &id, &values, defaults, explain, format),
        Commands::Ask { id, explain } => ask(&ctx, &id, explain),
        Commands::Staged {
            id,
            first,
            second,
            explain,
        } => run_staged(&ctx, &id, &first, &second, explain),
        Commands::Request { file } => request(&ctx, file),
        Commands::Check => {
            println!(
                "{} models and {} two-stage models OK",
                ctx.catalog.len(),
                ctx.catalog.staged_models().count()
            );
            EXIT_SUCCESS
        }
    };

    std::process::exit(code);
}

fn unknown_model(catalog: &Catalog, id: &str) -> i32 {
    eprintln!("Unknown model '{}'.", id);
    let hints = catalog.suggest(id);
    if !hints.is_empty() {
        eprintln!("Did you mean: {}?", hints.join(", "));
    }
    eprintln!("Run `omm-calc list` to see all models.");
    EXIT_USAGE
}

fn lookup<'a>(catalog: &'a Catalog, id: &str) -> Result<&'a FormulaSpec, i32> {
    catalog.get(id).ok_or_else(|| unknown_model(catalog, id))
}

fn parse_assignments(values: &[String]) -> Result<EvaluationInput, i32> {
    EvaluationInput::from_assignments(values).map_err(|e| {
        eprintln!("{}", e);
        EXIT_USAGE
    })
}

fn show(ctx: &Context, id: &str) -> i32 {
    if let Some(pair) = ctx.catalog.staged(id) {
        println!("{} ({})", pair.title, pair.id);
        println!("  Stage 2 runs when stage 1 is \"{}\"", pair.gate);
        for stage in [&pair.first, &pair.second] {
            if let Some(spec) = ctx.catalog.get(stage) {
                println!();
                println!("{}", output::format_model_detail(spec, ctx.use_colors));
            }
        }
        return EXIT_SUCCESS;
    }
    match lookup(&ctx.catalog, id) {
        Ok(spec) => {
            println!("{}", output::format_model_detail(spec, ctx.use_colors));
            EXIT_SUCCESS
        }
        Err(code) => code,
    }
}

fn report_invalid(errors: &[omm_calc::error::FieldError], use_colors: bool) -> i32 {
    eprintln!("Invalid input:");
    eprintln!("{}", output::format_field_errors(errors, use_colors));
    EXIT_INVALID_INPUT
}

fn report_misconfigured(e: &omm_calc::error::ConfigurationError) -> i32 {
    eprintln!("Configuration error: {}", e);
    EXIT_CONFIG
}

fn eval(ctx: &Context, id: &str, values: &[String], defaults: bool, explain: bool, format: Format) -> i32 {
    let spec = match lookup(&ctx.catalog, id) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let mut input = match parse_assignments(values) {
        Ok(i) => i,
        Err(code) => return code,
    };
    if defaults {
        input = input.with_defaults(spec);
    }
    let explain = explain || ctx.config.output.explain;
    let precision = ctx.config.output.precision;

    let outcome = assess(spec, &input);
    if format == Format::Json {
        let response = match outcome {
            Ok(result) => EvaluationResponse::Success(ScoreReport::from_result(&result, explain)),
            Err(Rejection::Invalid(errors)) => EvaluationResponse::Failure { errors },
            Err(Rejection::Misconfigured(e)) => return report_misconfigured(&e),
        };
        return print_json(&response);
    }

    match outcome {
        Ok(result) => {
            if format == Format::Tsv {
                println!("{}", output::format_tsv(&result, precision));
            } else {
                println!(
                    "{}",
                    output::format_result(&result, spec.score_symbol(), precision, explain, ctx.use_colors)
                );
            }
            EXIT_SUCCESS
        }
        Err(Rejection::Invalid(errors)) => report_invalid(&errors, ctx.use_colors),
        Err(Rejection::Misconfigured(e)) => report_misconfigured(&e),
    }
}

fn ask(ctx: &Context, id: &str, explain: bool) -> i32 {
    let spec = match lookup(&ctx.catalog, id) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let input = match omm_calc::interactive::ask(spec) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("{:#}", e);
            return EXIT_INVALID_INPUT;
        }
    };
    match assess(spec, &input) {
        Ok(result) => {
            println!();
            println!(
                "{}",
                output::format_result(
                    &result,
                    spec.score_symbol(),
                    ctx.config.output.precision,
                    explain || ctx.config.output.explain,
                    ctx.use_colors
                )
            );
            EXIT_SUCCESS
        }
        Err(Rejection::Invalid(errors)) => report_invalid(&errors, ctx.use_colors),
        Err(Rejection::Misconfigured(e)) => report_misconfigured(&e),
    }
}

fn run_staged(ctx: &Context, id: &str, first: &[String], second: &[String], explain: bool) -> i32 {
    let Some(pair) = ctx.catalog.staged(id) else {
        return unknown_model(&ctx.catalog, id);
    };
    // Pairs are checked against their models when the catalog is built
    let (Some(first_spec), Some(second_spec)) = (ctx.catalog.get(&pair.first), ctx.catalog.get(&pair.second)) else {
        return unknown_model(&ctx.catalog, id);
    };
    let first_input = match parse_assignments(first) {
        Ok(i) => i,
        Err(code) => return code,
    };
    let second_input = if second.is_empty() {
        None
    } else {
        match parse_assignments(second) {
            Ok(i) => Some(i),
            Err(code) => return code,
        }
    };

    let outcome = match staged::run(pair, first_spec, second_spec, &first_input, second_input.as_ref()) {
        Ok(o) => o,
        Err(Rejection::Invalid(errors)) => return report_invalid(&errors, ctx.use_colors),
        Err(Rejection::Misconfigured(e)) => return report_misconfigured(&e),
    };

    println!(
        "{}",
        output::format_staged_outcome(
            pair,
            &outcome,
            (first_spec.score_symbol(), second_spec.score_symbol()),
            ctx.config.output.precision,
            explain || ctx.config.output.explain,
            ctx.use_colors
        )
    );
    match outcome.second {
        staged::SecondStage::Invalid(_) => EXIT_INVALID_INPUT,
        _ => EXIT_SUCCESS,
    }
}

fn request(ctx: &Context, file: Option<PathBuf>) -> i32 {
    let text = match &file {
        Some(path) => std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e)),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map(|_| buf)
                .map_err(|e| format!("Failed to read stdin: {}", e))
        }
    };
    let text = match text {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_USAGE;
        }
    };

    let request: EvaluationRequest = match serde_json::from_str(&text) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Invalid request JSON: {}", e);
            return EXIT_USAGE;
        }
    };

    print_json(&contract::respond(&ctx.catalog, &request))
}

fn print_json(response: &EvaluationResponse) -> i32 {
    match serde_json::to_string_pretty(response) {
        Ok(json) => {
            println!("{}", json);
            if response.is_success() {
                EXIT_SUCCESS
            } else {
                EXIT_INVALID_INPUT
            }
        }
        Err(e) => {
            eprintln!("Failed to encode response: {}", e);
            EXIT_CONFIG
        }
    }
}
