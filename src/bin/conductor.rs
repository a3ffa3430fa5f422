//! conductor: command-line front end
//!
//! Inspect providers, validate API keys and dispatch one-off generations.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use conductor::abtest::VersionTester;
use conductor::{ApiKeys, Config, Dispatcher, DispatcherBuilder, GenerateOptions, KeyValidator};
use conductor::{ProviderKind, Recommendation};

/// Free-tier model orchestration
#[derive(Parser)]
#[command(name = "conductor")]
#[command(version)]
#[command(about = "Dispatch generations across free-tier model providers")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "CONDUCTOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List providers, their models and current quota
    Providers,

    /// Validate configured API keys against each provider
    CheckKeys,

    /// Generate content
    Generate {
        /// Prompt (or omit to read from stdin)
        prompt: Option<String>,
        /// Task type, e.g. caption-generation
        #[arg(short, long)]
        task: Option<String>,
        /// Force a provider
        #[arg(short, long)]
        provider: Option<ProviderKind>,
        /// Force a model
        #[arg(short, long)]
        model: Option<String>,
        /// Caller id for rollout bucketing
        #[arg(long)]
        user: Option<String>,
    },

    /// A/B test two versions of a model
    Compare {
        provider: ProviderKind,
        model: String,
        version_a: String,
        version_b: String,
        /// Custom test prompt; repeat for several
        #[arg(long = "prompt")]
        prompts: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load_or_default(args.config.as_deref())?;

    // Key checks don't need a dispatcher
    if let Command::CheckKeys = args.command {
        let validator = KeyValidator::new()?;
        for status in validator.status_all(&ApiKeys::from_env()).await {
            let verdict = match (status.configured, status.validated) {
                (false, _) => "not configured",
                (true, true) => "valid",
                (true, false) => "INVALID",
            };
            print!("{:<12} {verdict}", status.provider.as_str());
            if let Some(message) = status.message {
                print!(" ({message})");
            }
            println!();
        }
        return Ok(());
    }

    let dispatcher = DispatcherBuilder::from_config(&config)?.build()?;

    match args.command {
        Command::Providers => print_providers(&dispatcher),

        Command::Generate {
            prompt,
            task,
            provider,
            model,
            user,
        } => {
            let prompt = resolve_prompt(prompt)?;
            let mut options = GenerateOptions::new();
            if let Some(task) = task {
                options = options.task_type(task);
            }
            if let Some(provider) = provider {
                options = options.provider(provider);
            }
            if let Some(model) = model {
                options = options.model(model);
            }
            if let Some(user) = user {
                options = options.user_id(user);
            }

            let response = dispatcher.generate(&prompt, &options).await?;
            println!("{}", response.content);
            eprintln!(
                "-- {}:{}{} | {} tokens | {:.0?} | quality {:.2}{}",
                response.provider,
                response.model,
                response
                    .version
                    .as_deref()
                    .map(|v| format!("@{v}"))
                    .unwrap_or_default(),
                response.tokens,
                response.response_time,
                response.quality_score,
                if response.fallback_used { " | fallback" } else { "" },
            );
        }

        Command::Compare {
            provider,
            model,
            version_a,
            version_b,
            prompts,
        } => {
            let tester = VersionTester::new(Arc::new(dispatcher));
            let report = tester
                .compare(provider, &model, &version_a, &version_b, &prompts)
                .await?;
            for side in [&report.version_a, &report.version_b] {
                println!(
                    "{:<10} quality {:.3}  latency {:>7.0}ms  wins {}",
                    side.version, side.avg_quality, side.avg_response_time_ms, side.wins
                );
            }
            let verdict = match report.recommendation {
                Recommendation::Upgrade => "upgrade",
                Recommendation::Keep => "keep",
                Recommendation::Neutral => "neutral",
            };
            println!("recommendation: {verdict} ({})", report.reason);
        }

        Command::CheckKeys => unreachable!("handled above"),
    }

    Ok(())
}

fn print_providers(dispatcher: &Dispatcher) {
    for overview in dispatcher.providers() {
        let d = &overview.descriptor;
        let q = &overview.rate_limit;
        println!(
            "{} ({}){}",
            d.display_name,
            d.id,
            if overview.has_client { "" } else { " [no transport]" }
        );
        println!(
            "  requests today: {}{}",
            q.request_count,
            q.remaining
                .map(|r| format!(" ({r} left)"))
                .unwrap_or_default()
        );
        println!("  resets at:      {}", q.reset_at.to_rfc3339());
        println!("  models:         {}", d.models.join(", "));
    }
}

/// Prompt from the argument, else from piped stdin.
fn resolve_prompt(arg: Option<String>) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(prompt) = arg {
        return Ok(prompt);
    }
    if io::stdin().is_terminal() {
        return Err("generate: no prompt provided (pass it as an argument or via stdin)".into());
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf.trim().to_string())
}
