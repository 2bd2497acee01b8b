use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use pixelforge_contracts::config::{history_file_from_env, SessionConfig};
use pixelforge_contracts::history::HistoryRecorder;
use pixelforge_contracts::prompts::{
    compose_with_style_name, default_negative_prompt, PromptLibrary, StyleName,
};
use pixelforge_engine::imaging::{add_watermark, decode_image, encode_png};
use pixelforge_engine::{
    DryrunClient, GeneratedImage, GenerationRequest, GenerationResult, GenerationSession,
    HuggingFaceClient, ImageSize, Orchestrator, SynthesisClient, TransformRequest,
};
use serde_json::Value;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const DEFAULT_WATERMARK: &str = "AI Generated";

#[derive(Debug, Parser)]
#[command(
    name = "pixelforge",
    version,
    about = "Text-to-image and image transform client for hosted diffusion models"
)]
struct Cli {
    /// History log to use instead of PIXELFORGE_HISTORY_FILE.
    #[arg(long, global = true)]
    history_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one image from a prompt.
    Generate(GenerateArgs),
    /// Generate several images from the same prompt, each with its own seed.
    Batch(BatchArgs),
    /// Re-imagine an existing image from a prompt.
    Transform(TransformArgs),
    /// Browse the built-in prompt library.
    Library(LibraryArgs),
    /// Show recent generation attempts.
    History(HistoryArgs),
    /// Show aggregate success statistics.
    Stats,
    /// Delete every recorded attempt.
    ClearHistory,
}

#[derive(Debug, Args)]
struct PromptArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    quality_boost: bool,
    #[arg(long)]
    negative: Option<String>,
    /// Prepend the stock negative phrases to --negative.
    #[arg(long)]
    default_negative: bool,
    #[arg(long, default_value_t = 7.5)]
    guidance: f32,
}

#[derive(Debug, Args)]
struct OutputArgs {
    #[arg(long, default_value = ".")]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Paint deterministic placeholders instead of calling the remote model.
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[command(flatten)]
    prompt: PromptArgs,
    #[command(flatten)]
    output: OutputArgs,
    #[arg(long, default_value = "512x512")]
    size: ImageSize,
    #[arg(long)]
    seed: Option<u32>,
    #[arg(long, default_value_t = 50)]
    steps: u32,
    /// Also save a copy stamped with TEXT (default "AI Generated").
    #[arg(long, value_name = "TEXT", num_args = 0..=1, default_missing_value = DEFAULT_WATERMARK)]
    watermark: Option<String>,
}

#[derive(Debug, Parser)]
struct BatchArgs {
    #[command(flatten)]
    prompt: PromptArgs,
    #[command(flatten)]
    output: OutputArgs,
    #[arg(long, default_value = "512x512")]
    size: ImageSize,
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    count: u16,
    #[arg(long, default_value_t = 50)]
    steps: u32,
}

#[derive(Debug, Parser)]
struct TransformArgs {
    #[command(flatten)]
    prompt: PromptArgs,
    #[command(flatten)]
    output: OutputArgs,
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value_t = 0.75)]
    strength: f32,
    #[arg(long)]
    seed: Option<u32>,
    #[arg(long)]
    steps: Option<u32>,
}

#[derive(Debug, Parser)]
struct LibraryArgs {
    #[arg(long)]
    category: Option<String>,
    /// Print one random prompt instead of the listing.
    #[arg(long)]
    random: bool,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("pixelforge error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    init_tracing()?;
    let cli = Cli::parse();
    let history_override = cli.history_file;
    match cli.command {
        Command::Generate(args) => run_generate(args, history_override),
        Command::Batch(args) => run_batch(args, history_override),
        Command::Transform(args) => run_transform(args, history_override),
        Command::Library(args) => run_library(args),
        Command::History(args) => run_history(args, history_override),
        Command::Stats => run_stats(history_override),
        Command::ClearHistory => run_clear_history(history_override),
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pixelforge=info".parse()?))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}

fn run_generate(args: GenerateArgs, history_override: Option<PathBuf>) -> Result<i32> {
    let mut session = open_session(&args.output, history_override)?;
    let mut request = GenerationRequest::new(compose_prompt(&args.prompt), args.size);
    request.guidance_scale = args.prompt.guidance;
    request.negative_prompt = negative_prompt(&args.prompt);
    request.seed = args.seed;
    request.steps = Some(args.steps);

    let result = session.generate(&request);
    if let GenerationResult::Success(image) = &result {
        let path = save_image(&args.output.out, &format!("generated_{}.png", image.timestamp), image)?;
        print_saved(&path, image);
        if let Some(text) = args.watermark.as_deref() {
            let stamped = encode_png(&add_watermark(&image.image, text))?;
            let path = args.output.out.join(format!("watermarked_{}.png", image.timestamp));
            fs::write(&path, stamped).with_context(|| format!("failed to write {}", path.display()))?;
            println!("saved {}", path.display());
        }
    }
    Ok(report(std::slice::from_ref(&result)))
}

fn run_batch(args: BatchArgs, history_override: Option<PathBuf>) -> Result<i32> {
    let mut session = open_session(&args.output, history_override)?;
    let mut request = GenerationRequest::new(compose_prompt(&args.prompt), args.size);
    request.guidance_scale = args.prompt.guidance;
    request.negative_prompt = negative_prompt(&args.prompt);
    request.steps = Some(args.steps);

    let results = session.generate_batch(&request, usize::from(args.count));
    for (index, result) in results.iter().enumerate() {
        if let GenerationResult::Success(image) = result {
            let name = format!("batch_{}_{}.png", index + 1, image.timestamp);
            let path = save_image(&args.output.out, &name, image)?;
            print_saved(&path, image);
        }
    }
    let succeeded = results.iter().filter(|result| result.is_success()).count();
    println!("batch: {succeeded}/{} succeeded", results.len());
    Ok(report(&results))
}

fn run_transform(args: TransformArgs, history_override: Option<PathBuf>) -> Result<i32> {
    let bytes = fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let init_image = decode_image(&bytes)
        .with_context(|| format!("failed to load {}", args.image.display()))?;
    let mut session = open_session(&args.output, history_override)?;

    let mut request = TransformRequest::new(compose_prompt(&args.prompt), init_image, args.strength);
    request.guidance_scale = args.prompt.guidance;
    request.negative_prompt = negative_prompt(&args.prompt);
    request.seed = args.seed;
    request.steps = args.steps;

    let result = session.transform(&request);
    if let GenerationResult::Success(image) = &result {
        let path = save_image(&args.output.out, &format!("transformed_{}.png", image.timestamp), image)?;
        print_saved(&path, image);
    }
    Ok(report(std::slice::from_ref(&result)))
}

fn run_library(args: LibraryArgs) -> Result<i32> {
    let library = PromptLibrary::new();
    if let Some(category) = args.category.as_deref() {
        if library.prompts(category).is_none() {
            bail!(
                "unknown category {category:?}; expected one of: {}",
                library.categories().join(", ")
            );
        }
    }
    if args.random {
        let prompt = library.random_prompt(args.category.as_deref(), &mut rand::thread_rng());
        println!("{prompt}");
        return Ok(0);
    }

    let categories = match args.category.as_deref() {
        Some(category) => vec![category],
        None => library.categories(),
    };
    for category in categories {
        println!("{category}:");
        for prompt in library.prompts(category).unwrap_or_default() {
            println!("  - {prompt}");
        }
    }
    println!();
    println!(
        "styles: {}",
        StyleName::ALL
            .iter()
            .map(|style| style.label())
            .collect::<Vec<&str>>()
            .join(", ")
    );
    Ok(0)
}

fn run_history(args: HistoryArgs, history_override: Option<PathBuf>) -> Result<i32> {
    let recorder = HistoryRecorder::open(resolve_history_file(history_override));
    let recent = recorder.recent(args.limit);
    if recent.is_empty() {
        println!("no generations recorded yet");
        return Ok(0);
    }
    for entry in recent {
        let status = if entry.success { "ok" } else { "failed" };
        println!(
            "{}  {:<6}  {}  {}",
            entry.timestamp,
            status,
            entry.prompt,
            Value::Object(entry.settings)
        );
    }
    Ok(0)
}

fn run_stats(history_override: Option<PathBuf>) -> Result<i32> {
    let recorder = HistoryRecorder::open(resolve_history_file(history_override));
    let stats = recorder.stats();
    println!("total: {}", stats.total);
    println!("successful: {}", stats.successful);
    println!("failed: {}", stats.failed);
    println!("success rate: {:.1}%", stats.success_rate);
    Ok(0)
}

fn run_clear_history(history_override: Option<PathBuf>) -> Result<i32> {
    let mut recorder = HistoryRecorder::open(resolve_history_file(history_override));
    let removed = recorder.len();
    recorder.clear()?;
    println!("history cleared ({removed} entries removed)");
    Ok(0)
}

fn resolve_history_file(history_override: Option<PathBuf>) -> PathBuf {
    history_override.unwrap_or_else(history_file_from_env)
}

fn open_session(output: &OutputArgs, history_override: Option<PathBuf>) -> Result<GenerationSession> {
    let (client, history_file): (Box<dyn SynthesisClient>, PathBuf) = if output.dryrun {
        (
            Box::new(DryrunClient::new()),
            resolve_history_file(history_override),
        )
    } else {
        let config = SessionConfig::from_env()?;
        let history_file = history_override.unwrap_or_else(|| config.history_file.clone());
        (Box::new(HuggingFaceClient::new(&config)?), history_file)
    };
    fs::create_dir_all(&output.out)
        .with_context(|| format!("failed to create {}", output.out.display()))?;
    let events_path = output
        .events
        .clone()
        .unwrap_or_else(|| output.out.join("events.jsonl"));
    Ok(GenerationSession::start(
        Orchestrator::new(client),
        HistoryRecorder::open(history_file),
        Some(events_path),
    ))
}

fn compose_prompt(args: &PromptArgs) -> String {
    let composed = compose_with_style_name(&args.prompt, args.style.as_deref(), args.quality_boost);
    if let (Some(style), None) = (args.style.as_deref(), composed.applied_style) {
        warn!(style, "unknown style; prompt sent without a style template");
    }
    composed.text
}

fn negative_prompt(args: &PromptArgs) -> Option<String> {
    let custom = args
        .negative
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    if !args.default_negative {
        return custom;
    }
    let extra: Vec<String> = custom.into_iter().collect();
    Some(default_negative_prompt(Some(&extra)))
}

fn save_image(dir: &Path, name: &str, image: &GeneratedImage) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, &image.png_bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn print_saved(path: &Path, image: &GeneratedImage) {
    println!(
        "saved {} ({}x{}, seed {})",
        path.display(),
        image.width,
        image.height,
        image.seed
    );
}

fn report(results: &[GenerationResult]) -> i32 {
    let mut failed = 0;
    for result in results {
        if let GenerationResult::Failure(failure) = result {
            failed += 1;
            eprintln!("{} [{}]", failure.message, failure.kind.as_str());
        }
    }
    if failed == 0 {
        0
    } else {
        2
    }
}
