//! chat-stream console entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args
//!   3. Load config
//!   4. Resolve effective log level (CLI `-v` flags > env > config)
//!   5. Init logger once
//!   6. Build the LLM provider
//!   7. Answer the command-line question, or run the console until Ctrl-C / EOF

use chat_stream::console::{self, ChatSession};
use chat_stream::{config, error, llm, logger};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), error::AppError> {
    // Load .env if present; ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    let force_cli_level = args.log_level.is_some();
    logger::init(effective_log_level, force_cli_level)?;

    info!(
        bot_name = %config.bot_name,
        provider = %config.llm.provider,
        model = %config.chat.sampling.model,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let provider = llm::providers::build(&config.llm, config.llm_api_key.clone())?;
    if let Err(e) = provider.ping().await {
        warn!(provider = provider.name(), "provider ping failed: {e}");
    }
    let user_id = std::env::var("USER").unwrap_or_else(|_| "console".to_string());
    let mut session = ChatSession::new(provider, config.chat.clone(), user_id, config.history_cap);

    if let Some(question) = args.question {
        let outcome = session.ask(&question).await?;
        info!(stop_reason = ?outcome.stop_reason, segments = outcome.segments.len(), "answer received");
        console::print_outcome(&outcome);
        return Ok(());
    }

    // Ctrl-C cancels the token so the console loop exits.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    console::run_console(session, shutdown).await
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
    question: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut words: Vec<String> = Vec::new();

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            words.extend(iter.by_ref());
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: chat-stream [OPTIONS] [QUESTION...]");
                println!();
                println!("Without a question, starts an interactive console.");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => words.push(arg),
        }
    }

    let question = (!words.is_empty()).then(|| words.join(" "));

    CliArgs { log_level: logger::level_for_verbosity(verbosity), config_path, question }
}
