use anyhow::Context;
use cancelrisk_core::artifacts::read_encoding_spec;
use cancelrisk_core::config::Settings;
use cancelrisk_core::scoring::ScoringService;
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cancelrisk_cli")]
struct Args {
    /// Model artifact. Overrides CANCELRISK_MODEL_PATH.
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Encoding spec. Overrides CANCELRISK_ENCODING_SPEC_PATH.
    #[arg(long, global = true)]
    encoding_spec: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Score one booking record and print the result as JSON.
    Score {
        /// JSON file with the booking record, or `-` for stdin.
        #[arg(long)]
        record: String,

        /// Pretty-print the output.
        #[arg(long)]
        pretty: bool,
    },
    /// Load the artifacts, run every consistency check and print a summary.
    Check,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    if let Some(model) = args.model {
        settings.model_path = model;
    }
    if let Some(encoding_spec) = args.encoding_spec {
        settings.encoding_spec_path = encoding_spec;
    }

    let result = run(&settings, args.command);
    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "cancelrisk_cli failed");
    }
    result
}

fn run(settings: &Settings, command: Command) -> anyhow::Result<()> {
    let service = ScoringService::load(&settings.artifact_paths(), settings.scoring_config())
        .context("failed to load scoring artifacts")?;

    match command {
        Command::Score { record, pretty } => {
            let raw = read_record(&record)?;
            let scored = service
                .score(&raw)
                .with_context(|| format!("failed to score record from {record}"))?;
            let out = if pretty {
                serde_json::to_string_pretty(&scored)?
            } else {
                serde_json::to_string(&scored)?
            };
            println!("{out}");
        }
        Command::Check => {
            let parity_samples = read_encoding_spec(&settings.encoding_spec_path)?
                .parity_samples
                .len();
            let encoder = service.encoder();
            let model = service.model();
            println!("encoding spec   {}", encoder.version());
            println!("model           {} ({})", model.version(), model.kind_name());
            if let Some(trained_at) = model.trained_at() {
                println!("trained at      {}", trained_at.to_rfc3339());
            }
            println!("features        {}", encoder.feature_count());
            println!("fields          {}", service.registry().len());
            println!("layout          {:#010x}", encoder.layout_signature());
            println!("parity samples  {parity_samples} (all match)");
        }
    }

    Ok(())
}

fn read_record(source: &str) -> anyhow::Result<serde_json::Value> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read record from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("failed to read {source}"))?
    };
    serde_json::from_str(&text).with_context(|| format!("record in {source} is not valid JSON"))
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
