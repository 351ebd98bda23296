//! Elenchus - LLM-driven unit test generation
//!
//! Command-line driver: processes programs under test sequentially, one
//! generation session each, and appends every outcome to `outcomes.jsonl`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use elenchus::config::SETTINGS_FILE;
use elenchus::{
    list_put_ids, DirectoryPutSource, IterationController, OutcomeRecord, PromptBuilder,
    PutSource, Settings,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "elenchus")]
#[command(version)]
#[command(about = "Generate and repair pytest suites with a language model", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (defaults to ./elenchus.json when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the programs under test
    #[arg(long, global = true)]
    puts_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate tests for the given PUTs (all discovered PUTs when omitted)
    Generate {
        /// PUT identifiers, e.g. he_0 he_1
        put_ids: Vec<String>,

        /// Maximum attempts per PUT
        #[arg(short, long)]
        max_iterations: Option<u32>,

        /// Directory for generated tests, logs and reports
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Model provider: ollama, claude, or command
        #[arg(long)]
        provider: Option<String>,

        /// Model name passed to the provider
        #[arg(long)]
        model: Option<String>,

        /// Only check syntax; do not run the generated tests
        #[arg(long)]
        no_run: bool,

        /// Collect line coverage for passing tests
        #[arg(long)]
        coverage: bool,

        /// Seconds before a test run is killed (0 disables)
        #[arg(long, value_name = "SECS")]
        test_timeout: Option<u64>,

        /// Technique identifier reported with each experiment
        #[arg(long)]
        technique: Option<String>,

        /// Do not write experiment events
        #[arg(long)]
        no_record: bool,
    },

    /// List the PUTs available in the PUT directory
    List,

    /// Print the initial prompt for a PUT without calling a model
    Prompt {
        /// PUT identifier
        put_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "elenchus=debug,info".to_string()
        } else {
            "elenchus=info,warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Generate {
            put_ids,
            max_iterations,
            output_dir,
            provider,
            model,
            no_run,
            coverage,
            test_timeout,
            technique,
            no_record,
        } => {
            if let Some(n) = max_iterations {
                settings.max_iterations = n;
            }
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            if let Some(provider) = provider {
                settings.llm.provider = provider.to_lowercase();
            }
            if let Some(model) = model {
                settings.llm.model = model;
            }
            if no_run {
                settings.run_tests = false;
            }
            if coverage {
                settings.coverage = true;
            }
            if let Some(secs) = test_timeout {
                settings.test_timeout_secs = secs;
            }
            if let Some(technique) = technique {
                settings.technique_id = technique;
            }
            if no_record {
                settings.record_experiments = false;
            }

            if let Err(e) = settings.validate() {
                eprintln!("{} {}", "Error:".red().bold(), e);
                std::process::exit(1);
            }

            let ids = if put_ids.is_empty() {
                list_put_ids(&settings.puts_dir)?
            } else {
                put_ids
            };
            if ids.is_empty() {
                eprintln!(
                    "{} No PUTs found in {}",
                    "Error:".red().bold(),
                    settings.puts_dir.display()
                );
                std::process::exit(1);
            }

            run_generate(settings, &ids).await?;
        }

        Commands::List => {
            let ids = list_put_ids(&settings.puts_dir)?;
            if ids.is_empty() {
                println!(
                    "{} No PUTs found in {}",
                    "Note:".yellow().bold(),
                    settings.puts_dir.display()
                );
            }
            for id in ids {
                println!("{id}");
            }
        }

        Commands::Prompt { put_id } => {
            let source = DirectoryPutSource::new(settings.puts_dir.clone());
            match source.load(&put_id) {
                Ok(put) => {
                    let prompt = PromptBuilder::from_settings(&settings).build(&put, None, None);
                    println!("{prompt}");
                }
                Err(e) => {
                    eprintln!("{} {}", "Error:".red().bold(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

/// Defaults < settings file < environment < global CLI flags.
fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE));
    if cli.config.is_some() && !path.exists() {
        anyhow::bail!("settings file not found: {}", path.display());
    }

    let mut settings = Settings::load(&path)?;
    settings.apply_env()?;
    if let Some(dir) = &cli.puts_dir {
        settings.puts_dir = dir.clone();
    }
    Ok(settings)
}

async fn run_generate(settings: Settings, ids: &[String]) -> anyhow::Result<()> {
    let controller = IterationController::from_settings(settings)?;
    let outcomes = controller.layout().outcomes_file();

    println!(
        "{} {} PUT(s) with {} (max {} iterations)",
        "Generating".bold(),
        ids.len(),
        controller.settings().llm.model,
        controller.settings().max_iterations
    );

    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        let record = controller.run(id).await;
        append_outcome(&outcomes, &record)?;
        print_outcome(&record);
        records.push(record);
    }

    print_summary(&records, &outcomes);
    Ok(())
}

fn append_outcome(path: &Path, record: &OutcomeRecord) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    writeln!(file, "{}", serde_json::to_string(record)?)?;
    Ok(())
}

fn print_outcome(record: &OutcomeRecord) {
    if record.success {
        let coverage = record
            .coverage_percent
            .map(|c| format!(", coverage {c:.2}%"))
            .unwrap_or_default();
        println!(
            "  {} {} ({} iteration(s){})",
            "OK".green().bold(),
            record.put_id,
            record.test_iterations_needed,
            coverage
        );
    } else {
        println!(
            "  {} {} [{}] {}",
            "FAIL".red().bold(),
            record.put_id,
            record.status,
            record.error.as_deref().unwrap_or_default()
        );
    }
}

fn print_summary(records: &[OutcomeRecord], outcomes: &Path) {
    let total = records.len();
    let succeeded = records.iter().filter(|r| r.success).count();
    let iterations: u32 = records.iter().map(|r| r.test_iterations_needed).sum();
    let coverages: Vec<f64> = records.iter().filter_map(|r| r.coverage_percent).collect();

    println!();
    println!("{}", "Summary".bold());
    println!("  Succeeded: {}/{}", succeeded, total);
    if total > 0 {
        println!("  Average iterations: {:.2}", f64::from(iterations) / total as f64);
    }
    if !coverages.is_empty() {
        println!(
            "  Average coverage: {:.2}%",
            coverages.iter().sum::<f64>() / coverages.len() as f64
        );
    }
    println!("  Outcomes: {}", outcomes.display());
}
