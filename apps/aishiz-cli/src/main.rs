use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use aishiz_core::paths::{params_path, plugins_dir};
use aishiz_core::{
    channel_callback, EchoEngine, GenerationRequest, InferenceEngine, InferenceParams,
    ParamsStore, SamplingParams, SessionController, SessionSummary, StreamEvent,
};
use aishiz_plugins::{load_plugin_once, PluginEngine};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EngineKind {
    /// Built-in engine that streams the prompt back.
    Echo,
    /// Engine plugin from AISHIZ_PLUGIN_PATH or the plugins dir.
    Plugin,
}

/// Run one generation session and stream its output to stdout.
#[derive(Parser, Debug)]
#[command(name = "aishiz", version, about, long_about = None)]
struct Args {
    /// Model file to load
    #[arg(short, long, default_value = "")]
    model: String,

    /// Prompt text
    #[arg(short, long)]
    prompt: String,

    #[arg(long, value_enum, default_value_t = EngineKind::Echo)]
    engine: EngineKind,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    top_p: Option<f32>,

    #[arg(long)]
    top_k: Option<i32>,

    #[arg(long)]
    repeat_penalty: Option<f32>,

    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    context_length: Option<u32>,

    /// Sampling seed up to u32::MAX; negative picks one from the clock
    #[arg(
        long,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i64).range(..=SamplingParams::MAX_SEED)
    )]
    seed: Option<i64>,

    /// Parameter store (defaults to the per-user params.json)
    #[arg(long)]
    params: Option<PathBuf>,

    /// Store the effective parameters as this model's profile
    #[arg(long)]
    save_params: bool,

    /// Request a stop after this many streamed tokens (at least 1)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    stop_after: Option<u32>,
}

impl Args {
    fn apply_overrides(&self, mut p: InferenceParams) -> InferenceParams {
        if let Some(v) = self.temperature {
            p.temperature = v;
        }
        if let Some(v) = self.top_p {
            p.top_p = v;
        }
        if let Some(v) = self.top_k {
            p.top_k = v;
        }
        if let Some(v) = self.repeat_penalty {
            p.repeat_penalty = v;
        }
        if let Some(v) = self.max_tokens {
            p.max_tokens = v;
        }
        if let Some(v) = self.context_length {
            p.context_length = v;
        }
        if let Some(v) = self.seed {
            p.seed = v;
        }
        p
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Profile key for a model: its file name, or the raw path if it has none.
fn model_key(model: &str) -> String {
    Path::new(model)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| model.to_string())
}

fn run(args: Args) -> Result<()> {
    let store_path = args.params.clone().unwrap_or_else(params_path);
    let mut store = ParamsStore::load(&store_path);
    let key = model_key(&args.model);
    let params = args.apply_overrides(store.params_for(&key));

    if args.save_params {
        store.set_params(key.clone(), params.clone());
        store
            .save()
            .with_context(|| format!("saving {}", store_path.display()))?;
        info!(model = %key, path = %store_path.display(), "parameters saved");
    }

    let request = params.to_request(args.model.clone(), args.prompt.clone());
    let summary = match args.engine {
        EngineKind::Echo => generate(EchoEngine::new(), request, args.stop_after)?,
        EngineKind::Plugin => {
            let plugin = load_plugin_once(&plugins_dir()).context("loading engine plugin")?;
            generate(PluginEngine::new(plugin), request, args.stop_after)?
        }
    };

    info!(
        session = %summary.id,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        outcome = ?summary.outcome,
        "session finished"
    );
    Ok(())
}

fn generate<E: InferenceEngine>(
    engine: E,
    request: GenerationRequest,
    stop_after: Option<u32>,
) -> Result<SessionSummary> {
    let controller = SessionController::new(engine);
    let (callback, events) = channel_callback();

    let id = controller.start_generation(request, Some(callback));
    if !id.is_valid() {
        return Err(anyhow!("session could not be started"));
    }

    let mut stdout = io::stdout().lock();
    let mut streamed: u32 = 0;
    let mut failure = None;

    for event in events.iter() {
        match event {
            StreamEvent::Token(text) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
                streamed += 1;
                if stop_after == Some(streamed) {
                    controller.stop_generation(id);
                }
            }
            StreamEvent::Complete => break,
            StreamEvent::Error(msg) => {
                failure = Some(msg);
                break;
            }
        }
    }
    writeln!(stdout)?;

    let summary = controller
        .join(id)
        .ok_or_else(|| anyhow!("generation worker for session {id} was lost"))?;
    match failure {
        Some(msg) => Err(anyhow!(msg)),
        None => {
            if streamed == 0 {
                warn!(session = %id, "no output produced");
            }
            Ok(summary)
        }
    }
}
