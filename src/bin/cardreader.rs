//! CLI binary for cardreader.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use cardreader::{
    run_pipeline, CardReaderError, ContactRow, CsvStore, Degradation, ExtractionConfig,
    ExtractionProgressCallback, ExtractionOutcome, ExtractionReport, PipelineContext,
    ProgressCallback, SaveRequest, Stage,
};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one spinner for the running stage, one log line per
/// finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        self.bar
            .set_prefix(format!("[{}/{}]", stage.ordinal(), Stage::ALL.len()));
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<24} {}",
            green("✓"),
            stage.to_string(),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_stage_degraded(&self, stage: Stage, reason: &Degradation) {
        self.bar
            .println(format!("  {} {:<24} {}", yellow("⚠"), stage.to_string(), yellow(&reason.to_string())));
    }

    fn on_extraction_complete(&self, _reconciled: bool, _total_ms: u64) {
        self.bar.finish_and_clear();
    }

    fn on_extraction_failed(&self, _error: &CardReaderError) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a card (human summary)
  cardreader extract card.jpg

  # JSON record, heuristics only, appended to a CSV
  cardreader extract --json --no-ai --save cards.csv card.jpg

  # Save a reviewed record
  cardreader save --store cards.csv reviewed.json

  # Run the HTTP service (build with --features server)
  cardreader serve --bind 0.0.0.0:8000

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default reconciliation model)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  TESSDATA_PREFIX         Tesseract language data directory
"#;

/// Extract contact records from business-card photos.
#[derive(Parser, Debug)]
#[command(
    name = "cardreader",
    version,
    about = "Extract contact records from business-card photos",
    long_about = "Rectifies a business-card photo, runs three OCR passes over enhanced variants, \
picks the owner, company, emails, phones and address heuristically, and optionally lets a vision \
model correct the result against the original photo.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CARDREADER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CARDREADER_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline on one image file or URL.
    Extract {
        /// Local image path or HTTP/HTTPS URL.
        input: String,

        /// Print the record as JSON instead of a summary.
        #[arg(long)]
        json: bool,

        /// Print the full report (record, degradations, timings) as JSON.
        #[arg(long, conflicts_with = "json")]
        report: bool,

        /// Append the extracted record to this CSV file.
        #[arg(long, env = "CARDREADER_STORE")]
        save: Option<PathBuf>,

        /// Disable the progress spinner.
        #[arg(long)]
        no_progress: bool,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Append a reviewed JSON record to the CSV store.
    Save {
        /// CSV file to append to.
        #[arg(long, env = "CARDREADER_STORE")]
        store: PathBuf,

        /// JSON file with the record; `-` or omitted reads stdin.
        file: Option<PathBuf>,
    },

    /// Run the HTTP service.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "CARDREADER_BIND", default_value = "0.0.0.0:8000")]
        bind: String,

        /// Directory uploaded cards are stored in.
        #[arg(long, env = "CARDREADER_UPLOADS", default_value = "data/samples")]
        uploads: PathBuf,

        /// CSV file `/save` appends to.
        #[arg(long, env = "CARDREADER_STORE", default_value = "data/extracted/business_cards.csv")]
        store: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

/// Flags shared by every command that runs the pipeline.
#[derive(Args, Debug)]
struct PipelineArgs {
    /// Skip AI reconciliation; heuristics only.
    #[arg(long, env = "CARDREADER_NO_AI")]
    no_ai: bool,

    /// LLM model ID (e.g. gemini-2.0-flash, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Tesseract language code(s), e.g. `eng` or `eng+hin`.
    #[arg(long, env = "CARDREADER_LANG", default_value = "eng")]
    lang: String,

    /// Path to the `tesseract` executable.
    #[arg(long, env = "CARDREADER_TESSERACT")]
    tesseract: Option<PathBuf>,

    /// Tesseract language data directory.
    #[arg(long, env = "TESSDATA_PREFIX")]
    tessdata: Option<PathBuf>,

    /// Height the photo is resized to for edge detection (100–2000).
    #[arg(long, default_value_t = 500)]
    working_height: u32,

    /// Max LLM output tokens.
    #[arg(long, env = "CARDREADER_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "CARDREADER_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Reconciliation call timeout in seconds (unbounded if unset).
    #[arg(long, env = "CARDREADER_API_TIMEOUT")]
    api_timeout: Option<u64>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "CARDREADER_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers INFO-level feedback for `extract`.
    let spinner = matches!(
        &cli.command,
        Command::Extract { json: false, report: false, no_progress: false, .. }
    ) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || spinner {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Extract {
            input,
            json,
            report,
            save,
            no_progress: _,
            pipeline,
        } => {
            let progress: Option<ProgressCallback> = if spinner {
                Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
            } else {
                None
            };
            let ctx = PipelineContext::from_config(build_config(&pipeline, progress)?);
            if !cli.quiet && !json && !report {
                if let Some(reason) = ctx.vision_unavailable_reason() {
                    eprintln!("{}", dim(&format!("AI reconciliation off: {reason}")));
                }
            }
            run_extract(&input, &ctx, json, report, save, cli.quiet).await
        }
        Command::Save { store, file } => run_save(store, file, cli.quiet),
        Command::Serve {
            bind,
            uploads,
            store,
            pipeline,
        } => {
            let config = build_config(&pipeline, None)?;
            run_serve(&bind, uploads, store, config).await
        }
    }
}

async fn run_extract(
    input: &str,
    ctx: &PipelineContext,
    json: bool,
    report: bool,
    save: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    let result = match run_pipeline(input, ctx).await {
        Ok(r) => r,
        Err(e) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ExtractionOutcome::failed(&e))
                        .context("Failed to serialise output")?
                );
            } else {
                eprintln!("{} {}", red("✘"), e);
            }
            std::process::exit(1);
        }
    };

    if json {
        let outcome = ExtractionOutcome::Record(result.record.clone());
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to serialise output")?
        );
    } else if report {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise report")?
        );
    } else if !quiet {
        print_summary(&result);
    }

    if let Some(path) = save {
        let store = CsvStore::new(&path);
        let n = store
            .append(&ContactRow::from(&result.record))
            .with_context(|| format!("Failed to save record to {}", path.display()))?;
        if !quiet {
            eprintln!("{} saved as row {} of {}", green("✔"), n, bold(&path.display().to_string()));
        }
    }
    Ok(())
}

fn print_summary(report: &ExtractionReport) {
    let r = &report.record;
    let join = |set: &std::collections::BTreeSet<String>| {
        set.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    println!("{}    {}", bold("Owner:"), r.primary_owner);
    println!("{}  {}", bold("Company:"), r.primary_company);
    println!("{}   {}", bold("Emails:"), join(&r.emails));
    println!("{}   {}", bold("Phones:"), join(&r.phone_numbers));
    println!("{}  {}", bold("Address:"), r.address);
    if !r.potential_names.is_empty() {
        println!("{}", dim(&format!("Other names:     {}", join(&r.potential_names))));
    }
    if !r.company_names.is_empty() {
        println!("{}", dim(&format!("Other companies: {}", join(&r.company_names))));
    }

    let verdict = if report.reconciled {
        green("reconciled by AI")
    } else {
        yellow("heuristics only")
    };
    eprintln!("{}  {}", verdict, dim(&format!("{}ms total", report.timings.total_ms)));
}

fn run_save(store: PathBuf, file: Option<PathBuf>, quiet: bool) -> Result<()> {
    let body = match file.as_deref() {
        Some(p) if p.as_os_str() != "-" => std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read {}", p.display()))?,
        _ => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read record from stdin")?;
            buf
        }
    };
    let request: SaveRequest =
        serde_json::from_str(&body).context("Record is not a valid JSON object")?;
    let store = CsvStore::new(&store);
    let n = store.append(&request.to_row()).context("Failed to save record")?;
    if !quiet {
        eprintln!(
            "{} saved as row {} of {}",
            green("✔"),
            n,
            bold(&store.path().display().to_string())
        );
    }
    Ok(())
}

#[cfg(feature = "server")]
async fn run_serve(bind: &str, uploads: PathBuf, store: PathBuf, config: ExtractionConfig) -> Result<()> {
    use cardreader::server::{serve, AppState};

    let addr: std::net::SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address '{bind}'"))?;
    let ctx = PipelineContext::from_config(config);
    let state = AppState::new(ctx, CsvStore::new(store), uploads);
    serve(addr, state).await.context("HTTP server failed")
}

#[cfg(not(feature = "server"))]
async fn run_serve(_bind: &str, _uploads: PathBuf, _store: PathBuf, _config: ExtractionConfig) -> Result<()> {
    anyhow::bail!("this binary was built without the `server` feature; rebuild with --features server")
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(args: &PipelineArgs, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .ai_enabled(!args.no_ai)
        .ocr_language(args.lang.clone())
        .working_height(args.working_height)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .download_timeout_secs(args.download_timeout);

    if let Some(ref m) = args.model {
        builder = builder.model(m.clone());
    }
    if let Some(ref p) = args.provider {
        builder = builder.provider_name(p.clone());
    }
    if let Some(ref t) = args.tesseract {
        builder = builder.tesseract_cmd(t.clone());
    }
    if let Some(ref d) = args.tessdata {
        builder = builder.tessdata_dir(d.clone());
    }
    if let Some(secs) = args.api_timeout {
        builder = builder.api_timeout_secs(secs);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
