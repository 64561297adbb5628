//! qabench - historical trivia QA benchmark for locally served models.
//!
//! Generate answers against an Ollama-compatible endpoint, grade them with a
//! remote judge, then compare and plot the results.

mod cli;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use qabench::config::schema::ConfigOverrides;
use qabench::maintenance::{MatchMode, DEFAULT_REMOVED_IDS};

pub(crate) const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "qabench", about = "Historical trivia QA benchmark", version = VERSION)]
struct Cli {
    /// Config file (default: ./qabench.json, then ~/.qabench/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by commands that talk to the serving endpoint.
#[derive(Args, Debug, Default)]
struct ServingArgs {
    /// Model identifier as known to the serving endpoint.
    #[arg(short, long)]
    model: Option<String>,
    /// Language tag: `en` or `no`.
    #[arg(short, long)]
    lang: Option<String>,
    /// Number of questions to ask, from the start of the dataset.
    #[arg(short = 'n', long = "num-q")]
    num_q: Option<usize>,
    /// Dataset JSON with a `qa_pairs` list.
    #[arg(long)]
    qa_path: Option<PathBuf>,
    /// Directory answers and logs are written to.
    #[arg(short, long)]
    out_dir: Option<PathBuf>,
    /// Serving endpoint, e.g. `localhost:11434`.
    #[arg(long)]
    host: Option<String>,
    /// Attempts per question before recording an error.
    #[arg(long)]
    max_retries: Option<usize>,
    /// Seconds between attempts.
    #[arg(long)]
    retry_sleep: Option<f64>,
    /// Keep `<think>` blocks in recorded answers.
    #[arg(long)]
    no_strip_think: bool,
}

/// Flags shared by commands that talk to the grading endpoint.
#[derive(Args, Debug, Default)]
struct GradingArgs {
    /// Bearer key for the grading endpoint.
    #[arg(long)]
    api_key: Option<String>,
    /// Chat completions URL of the grading endpoint.
    #[arg(long)]
    url: Option<String>,
    /// Judge model.
    #[arg(long)]
    grading_model: Option<String>,
}

impl ServingArgs {
    fn overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host,
            model: self.model,
            lang: self.lang,
            num_questions: self.num_q,
            dataset_path: self.qa_path,
            out_dir: self.out_dir,
            max_retries: self.max_retries,
            retry_sleep_secs: self.retry_sleep,
            no_strip_think: self.no_strip_think,
            ..Default::default()
        }
    }
}

impl GradingArgs {
    fn overrides(self, concurrency: Option<usize>) -> ConfigOverrides {
        ConfigOverrides {
            api_key: self.api_key,
            grading_url: self.url,
            grading_model: self.grading_model,
            concurrency,
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a locally served model every question and record its answers.
    Generate {
        #[command(flatten)]
        serving: ServingArgs,
    },
    /// Grade answers files with the judge and update their logs.
    Grade {
        /// Results directory or a single answers file (default: the output directory).
        target: Option<PathBuf>,
        /// Concurrent judge requests per file.
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Grade every record, not only ungraded ones.
        #[arg(long)]
        regrade: bool,
        #[command(flatten)]
        grading: GradingArgs,
    },
    /// Send one chat request to the grading endpoint and print the raw response.
    Chat {
        /// User message.
        prompt: String,
        /// Optional system prompt.
        #[arg(long)]
        system: Option<String>,
        #[command(flatten)]
        grading: GradingArgs,
    },
    /// McNemar's paired test between two graded result sets.
    Mcnemar {
        /// `.json` answers file or `.txt` list of answers files.
        file1: PathBuf,
        /// `.json` answers file or `.txt` list of answers files.
        file2: PathBuf,
        /// CSV the result row is appended to.
        #[arg(long, default_value = qabench::analysis::mcnemar::DEFAULT_CSV)]
        output_csv: PathBuf,
        /// Do not write the CSV row.
        #[arg(long)]
        no_csv: bool,
    },
    /// Questions answered wrong in one file, or wrong (and right) in every file of a directory.
    HardQuestions {
        /// Answers file or results directory.
        input: PathBuf,
        /// Answers file full records are taken from (directory mode; default: first file).
        #[arg(long)]
        reference: Option<PathBuf>,
        /// Output JSON.
        #[arg(short, long, default_value = "hard_questions.json")]
        output: PathBuf,
    },
    /// Accuracy versus GPU-hours frontier per language.
    Pareto {
        /// Directory of run logs (default: the output directory).
        #[arg(long)]
        results_dir: Option<PathBuf>,
        /// Where `pareto_<lang>.csv` and `.png` are written.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Add `num_gpus` to logs that lack it.
    BackfillGpus {
        /// Directory of run logs (default: the output directory).
        #[arg(long)]
        results_dir: Option<PathBuf>,
        /// GPU count for models not in the known-large table.
        #[arg(long, default_value_t = 1)]
        default_num_gpus: u32,
    },
    /// Remove question ids from answers files (preview unless --apply).
    RemoveQuestions {
        /// Comma-separated question ids.
        #[arg(long, default_value = DEFAULT_REMOVED_IDS)]
        questions: String,
        /// Files to edit (default: `<out_dir>/*.json`).
        #[arg(long)]
        glob: Option<String>,
        /// How records are matched against the ids.
        #[arg(long = "match", value_enum, default_value_t = MatchMode::Auto)]
        match_mode: MatchMode,
        /// Write the changes.
        #[arg(long)]
        apply: bool,
    },
    /// Replace the last `-` with `_` in result file names (preview unless --apply).
    NormalizeNames {
        /// Directory of result files (default: the output directory).
        #[arg(long)]
        results_dir: Option<PathBuf>,
        /// Only rename files containing this substring.
        #[arg(long, default_value = "mimir")]
        contains: String,
        /// Perform the renames.
        #[arg(long)]
        apply: bool,
    },
    /// Render charts.
    Plot {
        #[command(subcommand)]
        action: PlotAction,
    },
}

#[derive(Subcommand)]
enum PlotAction {
    /// Accuracy per model, one bar per language.
    Accuracy {
        #[arg(long)]
        results_dir: Option<PathBuf>,
        #[arg(short, long, default_value = qabench::plot::ACCURACY_CHART)]
        output: PathBuf,
    },
    /// One chart per model family, ordered by size.
    Families {
        #[arg(long)]
        results_dir: Option<PathBuf>,
        #[arg(long, default_value = qabench::plot::FAMILY_DIR)]
        graph_dir: PathBuf,
    },
    /// Pareto scatter per language.
    Pareto {
        #[arg(long)]
        results_dir: Option<PathBuf>,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    // Always suppress noisy HTTP crates regardless of RUST_LOG.
    let noisy_crate_filters = ",hyper=warn,reqwest=warn,rustls=warn";
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(_) => {
            let combined = format!(
                "{}{}",
                std::env::var("RUST_LOG").unwrap_or_default(),
                noisy_crate_filters
            );
            tracing_subscriber::EnvFilter::new(combined)
        }
        Err(_) => {
            let level = if verbose { "debug" } else { "info" };
            tracing_subscriber::EnvFilter::new(format!("{}{}", level, noisy_crate_filters))
        }
    };
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Generate { serving } => cli::cmd_generate(config, serving.overrides()),
        Commands::Grade {
            target,
            concurrency,
            regrade,
            grading,
        } => cli::cmd_grade(config, grading.overrides(concurrency), target, regrade),
        Commands::Chat {
            prompt,
            system,
            grading,
        } => cli::cmd_chat(config, grading.overrides(None), &prompt, system.as_deref()),
        Commands::Mcnemar {
            file1,
            file2,
            output_csv,
            no_csv,
        } => cli::cmd_mcnemar(&file1, &file2, (!no_csv).then_some(output_csv.as_path())),
        Commands::HardQuestions {
            input,
            reference,
            output,
        } => cli::cmd_hard_questions(&input, reference.as_deref(), &output),
        Commands::Pareto { results_dir, out_dir } => cli::cmd_pareto(config, results_dir, &out_dir, true),
        Commands::BackfillGpus {
            results_dir,
            default_num_gpus,
        } => cli::cmd_backfill_gpus(config, results_dir, default_num_gpus),
        Commands::RemoveQuestions {
            questions,
            glob,
            match_mode,
            apply,
        } => cli::cmd_remove_questions(config, &questions, glob, match_mode, apply),
        Commands::NormalizeNames {
            results_dir,
            contains,
            apply,
        } => cli::cmd_normalize_names(config, results_dir, &contains, apply),
        Commands::Plot { action } => match action {
            PlotAction::Accuracy { results_dir, output } => {
                cli::cmd_plot_accuracy(config, results_dir, &output)
            }
            PlotAction::Families {
                results_dir,
                graph_dir,
            } => cli::cmd_plot_families(config, results_dir, &graph_dir),
            PlotAction::Pareto { results_dir, out_dir } => {
                cli::cmd_pareto(config, results_dir, &out_dir, false)
            }
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
