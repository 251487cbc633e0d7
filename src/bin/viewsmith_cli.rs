//! Viewsmith CLI - Template checks and one-off renders
//!
//! Commands: check, render, render-string, helpers, envelope
//! Outputs JSON to stdout (rendered markup for the render commands)
//! Returns non-zero when templates fail to compile or render

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use viewsmith_core::{
    build_catalog, build_compiler, build_registry, ResponseEnvelope, TemplateComposer, ViewConfig,
};

#[derive(Parser)]
#[command(name = "viewsmith-cli")]
#[command(about = "Viewsmith CLI - server-side view rendering")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML view configuration (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile configured sets and the views tree
    Check,

    /// Render a configured set
    Render {
        /// Set lookup key
        #[arg(short, long)]
        key: String,

        /// JSON model
        #[arg(short, long, default_value = "{}")]
        model: String,
    },

    /// Render inline markup
    RenderString {
        #[arg(long)]
        markup: String,

        /// JSON model
        #[arg(short, long, default_value = "{}")]
        model: String,
    },

    /// List registered helper names
    Helpers,

    /// Print a status envelope
    Envelope {
        kind: EnvelopeKind,

        /// Error detail, message text or redirect target
        #[arg(short, long, default_value = "")]
        value: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EnvelopeKind {
    Success,
    Reload,
    Error,
    Message,
    Redirect,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "viewsmith_core=info,viewsmith_cli=info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn emit(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => println!(r#"{{"error": "{}"}}"#, e),
    }
}

fn failure(error: impl std::fmt::Display) -> ExitCode {
    emit(&serde_json::json!({ "success": false, "error": error.to_string() }));
    ExitCode::FAILURE
}

fn parse_model(model: &str) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::from_str(model)
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match ViewConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => return failure(format!("Failed to load config: {}", e)),
        },
        None => ViewConfig::default(),
    };
    let registry = build_registry(&config);

    match cli.command {
        Commands::Check => {
            let catalog = match build_catalog(&config, registry.clone()) {
                Ok(c) => c,
                Err(e) => return failure(e),
            };
            let tree = match build_compiler(&config, registry).compile_tree(&config.views_root) {
                Ok(t) => t,
                Err(e) => return failure(e),
            };
            emit(&serde_json::json!({
                "success": true,
                "sets": catalog.keys().collect::<Vec<_>>(),
                "tree": tree.keys().collect::<Vec<_>>(),
            }));
            ExitCode::SUCCESS
        }

        Commands::Render { key, model } => {
            let model = match parse_model(&model) {
                Ok(m) => m,
                Err(e) => return failure(format!("Invalid model: {}", e)),
            };
            let catalog = match build_catalog(&config, registry) {
                Ok(c) => c,
                Err(e) => return failure(e),
            };
            match catalog.render(&key, &model) {
                Ok(out) => {
                    println!("{}", out);
                    ExitCode::SUCCESS
                }
                Err(e) => failure(e),
            }
        }

        Commands::RenderString { markup, model } => {
            let model = match parse_model(&model) {
                Ok(m) => m,
                Err(e) => return failure(format!("Invalid model: {}", e)),
            };
            let composer = TemplateComposer::new(build_compiler(&config, registry));
            match composer.compose_from_string(&markup, &model) {
                Ok(out) => {
                    println!("{}", out);
                    ExitCode::SUCCESS
                }
                Err(e) => failure(e),
            }
        }

        Commands::Helpers => {
            emit(&serde_json::json!({
                "timezone": registry.display_timezone().name(),
                "timezone_fell_back": registry.timezone_fell_back(),
                "helpers": registry.names().collect::<Vec<_>>(),
            }));
            ExitCode::SUCCESS
        }

        Commands::Envelope { kind, value } => {
            let envelope = match kind {
                EnvelopeKind::Success => ResponseEnvelope::success(),
                EnvelopeKind::Reload => ResponseEnvelope::reload(),
                EnvelopeKind::Error => ResponseEnvelope::error(value),
                EnvelopeKind::Message => ResponseEnvelope::message(value),
                EnvelopeKind::Redirect => ResponseEnvelope::redirect(value),
            };
            match envelope.to_json() {
                Ok(json) => {
                    println!("{}", json);
                    ExitCode::SUCCESS
                }
                Err(e) => failure(e),
            }
        }
    }
}
