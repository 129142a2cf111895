mod config;
mod error;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use retinal_openai::{DEFAULT_MAX_TOKENS, DetailLevel, ImageReference, PromptRequest};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Overrides, Settings, load_config};
use crate::error::{classify, vision_error};
use crate::output::{render_error, render_response};

const ANALYZE_PROMPT: &str = "What's in this image?";
const COMPARE_PROMPT: &str = "Compare these images";
const COMPARE_MAX_TOKENS: u32 = 1500;

#[derive(Parser)]
#[command(name = "retinal")]
#[command(about = "Ask a hosted vision model about images", long_about = None)]
struct Cli {
    /// Directory local images must be inside (default: current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct QueryArgs {
    /// Question or instruction about the image(s)
    #[arg(short, long)]
    prompt: Option<String>,

    /// Detail level: low, high, auto
    #[arg(short, long)]
    detail: Option<DetailLevel>,

    /// Model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum completion tokens
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Print the raw JSON response as well
    #[arg(long)]
    raw: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Describe a single image (local path or URL)
    Analyze {
        image: ImageReference,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Send several images in one request
    Compare {
        #[arg(required = true, num_args = 2..)]
        images: Vec<ImageReference>,

        #[command(flatten)]
        query: QueryArgs,
    },
}

impl Command {
    fn into_parts(self) -> (Vec<ImageReference>, QueryArgs, &'static str, u32) {
        match self {
            Command::Analyze { image, query } => {
                (vec![image], query, ANALYZE_PROMPT, DEFAULT_MAX_TOKENS)
            }
            Command::Compare { images, query } => {
                (images, query, COMPARE_PROMPT, COMPARE_MAX_TOKENS)
            }
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn wait_for_interrupt() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler means no cancellation.
        std::future::pending::<()>().await;
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (images, query, default_prompt, default_max_tokens) = cli.command.into_parts();

    let overrides = Overrides {
        base_url: cli.base_url,
        model: query.model,
        max_tokens: query.max_tokens,
        timeout_secs: cli.timeout,
        detail: query.detail,
        root: cli.root,
    };
    let settings = Settings::resolve(overrides, load_config(), |key| std::env::var(key).ok())?;

    let prompt = query.prompt.unwrap_or_else(|| default_prompt.to_string());
    let request = PromptRequest::with_images(prompt, images, settings.detail)?
        .with_max_tokens(settings.max_tokens.unwrap_or(default_max_tokens));

    info!(
        images = request.images().len(),
        prompt = request.prompt(),
        detail = %request.detail(),
        model = %settings.model,
        "Analyzing"
    );

    let client = settings.client();
    let response = client
        .analyze_until(&request, wait_for_interrupt())
        .await
        .with_context(|| {
            let sources: Vec<String> = request.images().iter().map(|i| i.to_string()).collect();
            format!("analyzing {}", sources.join(", "))
        })?;

    println!("{}", render_response(&response, query.raw));
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let (label, code) = classify(&err);
            eprintln!("{}", render_error(label, &err, vision_error(&err)));
            ExitCode::from(code)
        }
    }
}
