//! Curate English football text into a Bahasa Melayu post from the command line.
//!
//! Reads provider keys from `GEMINI_API_KEY`, `GROQ_API_KEY` and
//! `OPENROUTER_KEY`.
//!
//! # Examples
//!
//! ```sh
//! # Curate a match report with Gemini
//! tajuk --file report.txt --tone casual --source
//!
//! # Pipe text in, use Groq, fall back automatically when rate limited
//! cat report.txt | tajuk --stdin --provider groq --auto-fallback
//!
//! # Curate, then shorten and drop hashtags in a second call
//! tajuk --text "..." --refine shorten_detailed,remove_hashtags
//!
//! # Refine an existing post only
//! tajuk --file post.txt --post --refine rephrase --json
//! ```

use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser};
use serde::Serialize;
use tajuk_rs::prelude::*;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Curate English football text into a Bahasa Melayu social-media post.
#[derive(Parser)]
#[command(name = "tajuk", version)]
struct Cli {
    // ── Input ──────────────────────────────────────────────────
    /// Source text to curate
    #[arg(long, conflicts_with_all = ["file", "stdin"])]
    text: Option<String>,

    /// Read the source text from a file
    #[arg(long, conflicts_with = "stdin")]
    file: Option<PathBuf>,

    /// Read the source text from stdin
    #[arg(long)]
    stdin: bool,

    /// Treat the input as a finished post and only apply --refine
    #[arg(long, requires = "refine")]
    post: bool,

    // ── Style ──────────────────────────────────────────────────
    /// Writing style: formal or casual
    #[arg(long, default_value = "formal")]
    tone: Tone,

    /// End the post with a `Sumber:` line
    #[arg(long)]
    source: bool,

    /// Keep the source layout instead of rewriting it as a news post
    #[arg(long)]
    preserve_structure: bool,

    /// Ask for a post without hashtags
    #[arg(long)]
    no_hashtags: bool,

    /// Refinements applied in a second call (comma-separated or repeated)
    #[arg(long, value_delimiter = ',')]
    refine: Vec<Refinement>,

    // ── Provider ───────────────────────────────────────────────
    /// Provider: gemini, groq or openrouter
    #[arg(long, default_value = "gemini")]
    provider: ProviderKind,

    /// Model override for the selected provider
    #[arg(long)]
    model: Option<String>,

    /// Switch to the next configured provider when rate limited
    #[arg(long)]
    auto_fallback: bool,

    /// Total attempts per call (overrides the provider default)
    #[arg(long)]
    max_retries: Option<u32>,

    // ── Output ─────────────────────────────────────────────────
    /// Print the split post as JSON
    #[arg(long, conflicts_with = "plain")]
    json: bool,

    /// Print the generated text without splitting it
    #[arg(long)]
    plain: bool,

    /// Log more (-v info, -vv debug, -vvv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    #[serde(flatten)]
    post: ExtractedPost,
    provider: ProviderKind,
    attempts: u32,
    usage: TokenUsage,
    trace_id: &'a str,
    degraded: bool,
}

// ── Helpers ────────────────────────────────────────────────────────

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "tajuk_rs=info,tajuk=info",
        2 => "tajuk_rs=debug,tajuk=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn read_input(cli: &Cli) -> Result<String, CurationError> {
    if let Some(ref text) = cli.text {
        return Ok(text.clone());
    }
    if let Some(ref path) = cli.file {
        return std::fs::read_to_string(path).map_err(|e| {
            CurationError::Input(format!("failed to read '{}': {e}", path.display()))
        });
    }
    if cli.stdin {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| CurationError::Input(format!("failed to read stdin: {e}")))?;
        return Ok(buf);
    }
    Err(CurationError::Input(
        "provide --text, --file or --stdin".to_string(),
    ))
}

fn render(cli: &Cli, result: &CurationResult) -> Result<String, CurationError> {
    if cli.plain {
        return Ok(format!("{}\n", result.text));
    }
    let post = result.post();
    if cli.json {
        let out = JsonOutput {
            post,
            provider: result.provider,
            attempts: result.attempts,
            usage: result.usage,
            trace_id: &result.trace_id,
            degraded: result.degraded,
        };
        return serde_json::to_string_pretty(&out)
            .map(|s| format!("{s}\n"))
            .map_err(|e| CurationError::Parse(format!("failed to encode output: {e}")));
    }

    let mut out = String::new();
    if let Some(ref title) = post.title {
        out.push_str(&format!("Tajuk: {title}\n\n"));
    }
    out.push_str(&post.body);
    out.push('\n');
    if let Some(ref source) = post.source_citation {
        out.push_str(&format!("\n{source}\n"));
    }
    Ok(out)
}

async fn run(cli: &Cli, cancel: &CancellationToken) -> Result<String, CurationError> {
    let input = read_input(cli)?;

    let mut settings = ProviderSettings::from_env();
    if let Some(ref model) = cli.model
        && let Some(config) = settings.get_mut(cli.provider)
    {
        config.model = model.clone();
    }
    let provider = settings.require(cli.provider)?.clone();

    let mut config = CuratorConfig::default();
    if let Some(n) = cli.max_retries {
        config = config.with_max_retries(n);
    }
    let curator = Curator::new(config)?
        .with_event_handler(&LoggingHandler)
        .with_settings(settings);

    let result = if cli.post {
        refine(&curator, cli, &input, &provider, cancel).await?
    } else {
        let request = CurationRequest::new(input, cli.tone)
            .with_source_citation(cli.source)
            .with_preserve_structure(cli.preserve_structure)
            .with_hashtags(!cli.no_hashtags);
        let curated = if cli.auto_fallback {
            curator
                .curate_with_fallback(&request, &provider, cancel)
                .await?
        } else {
            curator.curate_cancellable(&request, &provider, cancel).await?
        };

        if cli.refine.is_empty() || curated.degraded {
            curated
        } else {
            // Refine on whichever provider produced the draft.
            let used = curator.settings().require(curated.provider)?.clone();
            refine(&curator, cli, &curated.text, &used, cancel).await?
        }
    };

    if result.degraded {
        eprintln!("Warning: the response could not be read; showing a placeholder.");
    }
    debug!("usage: {}", curator.usage_summary());
    render(cli, &result)
}

async fn refine(
    curator: &Curator<'_>,
    cli: &Cli,
    post: &str,
    provider: &ProviderConfig,
    cancel: &CancellationToken,
) -> Result<CurationResult, CurationError> {
    if cli.auto_fallback {
        curator
            .refine_with_fallback(post, &cli.refine, provider, cancel)
            .await
    } else {
        curator
            .refine_cancellable(post, &cli.refine, provider, cancel)
            .await
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match run(&cli, &cancel).await {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            debug!("{e}");
            process::exit(1);
        }
    }
}
