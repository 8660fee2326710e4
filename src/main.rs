//! XMPP-over-WebSocket group chat bot.
//!
//! Connects to an XMPP server through its WebSocket endpoint, joins a MUC
//! room and answers messages with either fixed command responses or
//! generative completions, depending on configuration.

mod config;
mod error;
mod history;
mod responder;
mod session;
mod stanza;
mod transport;

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{Config, Mode};
use error::BotError;
use responder::{CommandResponder, GenerativeResponder, Responder};
use session::Session;
use stanza::DisplayIdentity;
use transport::WsTransport;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // The subscriber is created before the session and outlives it.
    let default_level = if config.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        endpoint = %config.endpoint,
        jid = %config.jid,
        room = %config.room,
        mode = ?config.mode(),
        "starting bot"
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "bot terminated");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), BotError> {
    let mode = config.mode();
    let responder: Box<dyn Responder> = match mode {
        Mode::Generative => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                BotError::Config("generative mode requires OPENAI_API_KEY".to_string())
            })?;
            Box::new(GenerativeResponder::new(api_key))
        }
        Mode::Command => Box::new(CommandResponder::new()),
    };

    let display = DisplayIdentity {
        full_name: config.bot_name.clone(),
        first_name: config.bot_name.clone(),
        last_name: match mode {
            Mode::Command => "Assistant",
            Mode::Generative => "AI",
        }
        .to_string(),
    };

    let transport = WsTransport::connect(&config.endpoint, config.verify_tls).await?;
    let mut session = Session::new(
        transport,
        config.jid,
        config.password,
        config.room,
        display,
        responder,
        config.strict_self_filter,
    );

    tokio::select! {
        result = session.run() => result.map_err(BotError::from),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}
