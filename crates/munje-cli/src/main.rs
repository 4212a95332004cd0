mod client;
mod render;
mod server;

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use munje_contracts::events::{EventLog, EventPayload};
use munje_contracts::generation::MISSING_API_KEY_MESSAGE;
use munje_contracts::models::CandidateList;
use munje_contracts::runs::history::{format_relative_time, HistoryStore};
use munje_engine::preprocess::{kib, reduction_percent, DEFAULT_MAX_EDGE, DEFAULT_QUALITY};
use munje_engine::{
    check_models, compress_image, compress_or_original, error_chain_text, non_empty_env,
    CompressOptions, GeminiProvider, GeminiSettings, Generator, GeneratorConfig, ImagePayload,
    ModelCheck,
};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::client::{generate_questions, GenerateResult};
use crate::render::{
    render_history_row, render_model_check, render_print_layout, render_problem_list,
};
use crate::server::{AppState, DEFAULT_BODY_LIMIT};

const PREVIEW_MAX_EDGE: u32 = 64;
const PREVIEW_QUALITY: f32 = 0.5;

#[derive(Debug, Parser)]
#[command(
    name = "munje",
    version,
    about = "Generate similar math problems from a photo"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP endpoint that turns uploads into problem sets.
    Serve(ServeArgs),
    /// Generate problems for one image.
    Generate(GenerateArgs),
    /// Shrink an image the way uploads are shrunk.
    Compress(CompressArgs),
    /// Inspect saved problem sets.
    History(HistoryArgs),
    /// Work with the candidate model list.
    Models(ModelsArgs),
}

#[derive(Debug, Args)]
struct ModelArgs {
    /// Candidate model, tried in the order given. Repeatable.
    #[arg(long = "model")]
    models: Vec<String>,
    #[arg(long, default_value_t = 90)]
    timeout_secs: u64,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: SocketAddr,
    #[command(flatten)]
    model: ModelArgs,
    /// Append a JSONL trail of every request to this file.
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_BODY_LIMIT)]
    body_limit: usize,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    image: PathBuf,
    /// Base URL of a running `munje serve`. Without it the models are called
    /// from this process.
    #[arg(long)]
    server: Option<String>,
    #[command(flatten)]
    model: ModelArgs,
    #[command(flatten)]
    compress: CompressFlags,
    #[arg(long)]
    answers: bool,
    #[arg(long)]
    json: bool,
    #[arg(long)]
    no_save: bool,
    #[arg(long)]
    history: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CompressFlags {
    #[arg(long, default_value_t = DEFAULT_MAX_EDGE)]
    max_edge: u32,
    #[arg(long, default_value_t = DEFAULT_QUALITY)]
    quality: f32,
}

impl CompressFlags {
    fn options(&self) -> CompressOptions {
        CompressOptions {
            max_edge: self.max_edge,
            quality: self.quality,
        }
    }
}

#[derive(Debug, Args)]
struct CompressArgs {
    image: PathBuf,
    #[arg(long)]
    out: Option<PathBuf>,
    #[command(flatten)]
    compress: CompressFlags,
}

#[derive(Debug, Args)]
struct HistoryArgs {
    #[arg(long)]
    history: Option<PathBuf>,
    #[command(subcommand)]
    command: HistoryCommand,
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    List,
    Show {
        id: String,
        #[arg(long)]
        answers: bool,
        /// Problems first, answers on a separate section.
        #[arg(long)]
        print: bool,
    },
    Delete {
        id: String,
    },
    Clear,
}

#[derive(Debug, Args)]
struct ModelsArgs {
    #[command(subcommand)]
    command: ModelsCommand,
}

#[derive(Debug, Subcommand)]
enum ModelsCommand {
    /// Send a short text prompt to each candidate and report which respond.
    Check(ModelArgs),
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("munje error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::Generate(args) => run_generate(args),
        Command::Compress(args) => run_compress(args),
        Command::History(args) => run_history(args),
        Command::Models(args) => run_models(args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("munje=info,munje_engine=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    let settings = gemini_settings(&args.model);
    if !settings.has_api_key() {
        warn!("GEMINI_API_KEY is not set; generation requests will fail");
    }
    let config = generator_config(&args.model);
    info!(models = ?config.candidates.names(), "candidate models");
    let state = AppState::new(settings, config)
        .with_events_path(args.events)
        .with_body_limit(args.body_limit);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(server::serve(args.addr, state))?;
    Ok(0)
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let original = ImagePayload::from_path(&args.image)?;
    let image = compress_or_original(original.clone(), args.compress.options());
    let timeout = Duration::from_secs(args.model.timeout_secs);

    let result = match args.server.as_deref() {
        Some(server) => match generate_questions(server, &image, timeout) {
            Ok(result) => result,
            Err(err) => {
                eprintln!("{err}");
                if let Some(details) = err.details() {
                    eprintln!("details: {details}");
                }
                return Ok(1);
            }
        },
        None => {
            let settings = gemini_settings(&args.model);
            let provider = GeminiProvider::new(&settings)
                .map_err(|err| anyhow!("{MISSING_API_KEY_MESSAGE} ({err})"))?;
            let generator = Generator::new(generator_config(&args.model), provider);
            let events = args
                .events
                .as_ref()
                .map(|path| EventLog::new(path, Uuid::new_v4().to_string()));
            if let Some(events) = events.as_ref() {
                let mut payload = EventPayload::new();
                payload.insert("image_digest".to_string(), json!(image.digest()));
                payload.insert("image_bytes".to_string(), json!(image.len()));
                payload.insert("original_bytes".to_string(), json!(original.len()));
                events.emit("generation_started", payload)?;
            }
            let report = generator.generate(&image);
            if let Some(events) = events.as_ref() {
                events.record_report(&report)?;
            }
            match GenerateResult::from_outcome(report.outcome) {
                Ok(result) => result,
                Err(failure) => {
                    eprintln!("{}", failure.user_message());
                    eprintln!("details: {}", failure.diagnostic);
                    return Ok(1);
                }
            }
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result.to_json())?);
    }

    match result {
        GenerateResult::NotMathProblem { message } => {
            if !args.json {
                println!("{message}");
            }
            Ok(0)
        }
        GenerateResult::Problems { problems, model } => {
            if !args.json {
                if let Some(model) = model.as_deref() {
                    info!(model, problems = problems.len(), "problem set ready");
                }
                print!("{}", render_problem_list(&problems, args.answers));
            }
            if !args.no_save && !problems.is_empty() {
                let preview = compress_image(
                    &original,
                    CompressOptions {
                        max_edge: PREVIEW_MAX_EDGE,
                        quality: PREVIEW_QUALITY,
                    },
                )
                .map(|thumb| thumb.data_url())
                .ok();
                let store = history_store(args.history.as_deref());
                match store.save(problems, preview.as_deref()) {
                    Ok(saved) => info!(id = %saved.id, "saved to history"),
                    Err(err) => {
                        warn!(error = %error_chain_text(&err, 400), "failed to save history")
                    }
                }
            }
            Ok(0)
        }
    }
}

fn run_compress(args: CompressArgs) -> Result<i32> {
    let original = ImagePayload::from_path(&args.image)?;
    let compressed = compress_image(&original, args.compress.options())
        .with_context(|| format!("failed to compress {}", args.image.display()))?;
    let out = args
        .out
        .unwrap_or_else(|| args.image.with_extension("compressed.jpg"));
    fs::write(&out, &compressed.bytes)
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!(
        "{:.1}KB -> {:.1}KB ({}% smaller) {}",
        kib(original.len()),
        kib(compressed.len()),
        reduction_percent(original.len(), compressed.len()),
        out.display()
    );
    Ok(0)
}

fn run_history(args: HistoryArgs) -> Result<i32> {
    let store = history_store(args.history.as_deref());
    match args.command {
        HistoryCommand::List => {
            let entries = store.list();
            if entries.is_empty() {
                println!("저장된 문제가 없습니다.");
            }
            let now = Utc::now();
            for entry in entries {
                let label = format_relative_time(&entry.created_at, now);
                println!("{}", render_history_row(&entry, &label));
            }
        }
        HistoryCommand::Show { id, answers, print } => {
            let Some(entry) = store.get(&id) else {
                bail!("no saved problem set matches {id}");
            };
            if print {
                let label = format_relative_time(&entry.created_at, Utc::now());
                print!("{}", render_print_layout(&entry.questions, Some(&label)));
            } else {
                print!("{}", render_problem_list(&entry.questions, answers));
            }
        }
        HistoryCommand::Delete { id } => {
            let Some(entry) = store.get(&id) else {
                bail!("no saved problem set matches {id}");
            };
            store.delete(&entry.id)?;
            println!("deleted {}", entry.id);
        }
        HistoryCommand::Clear => {
            store.clear()?;
            println!("history cleared");
        }
    }
    Ok(0)
}

fn run_models(args: ModelsArgs) -> Result<i32> {
    match args.command {
        ModelsCommand::Check(model) => {
            let provider = GeminiProvider::new(&gemini_settings(&model))
                .map_err(|err| anyhow!("{MISSING_API_KEY_MESSAGE} ({err})"))?;
            let candidates = generator_config(&model).candidates;
            let checks = check_models(&provider, &candidates);
            for check in &checks {
                println!("{}", render_model_check(check));
            }
            Ok(models_exit_code(&checks))
        }
    }
}

/// Non-zero when any candidate failed to answer.
fn models_exit_code(checks: &[ModelCheck]) -> i32 {
    if checks.iter().all(ModelCheck::is_available) {
        0
    } else {
        1
    }
}

fn gemini_settings(args: &ModelArgs) -> GeminiSettings {
    GeminiSettings::from_env().with_timeout(Duration::from_secs(args.timeout_secs.max(1)))
}

/// `--model` flags win over `MUNJE_MODELS`, which wins over the built-in list.
fn generator_config(args: &ModelArgs) -> GeneratorConfig {
    GeneratorConfig::default().with_candidates(resolve_candidates(
        &args.models,
        non_empty_env("MUNJE_MODELS").as_deref(),
    ))
}

fn resolve_candidates(flags: &[String], env_override: Option<&str>) -> CandidateList {
    let from_flags = CandidateList::from_names(flags);
    if !from_flags.is_empty() {
        return from_flags;
    }
    env_override
        .and_then(CandidateList::parse_override)
        .unwrap_or_default()
}

fn history_store(explicit: Option<&Path>) -> HistoryStore {
    HistoryStore::new(resolve_history_path(
        explicit,
        non_empty_env("MUNJE_HISTORY").as_deref(),
        env::var_os("HOME").map(PathBuf::from).as_deref(),
    ))
}

fn resolve_history_path(
    explicit: Option<&Path>,
    env_override: Option<&str>,
    home: Option<&Path>,
) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = env_override {
        return PathBuf::from(path);
    }
    home.unwrap_or_else(|| Path::new("."))
        .join(".munje")
        .join("history.json")
}
