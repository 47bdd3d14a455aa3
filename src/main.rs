//! Terminal chat client.
//!
//! Drives one chat session from stdin: each line is sent to the webhook and
//! the reply is printed. Lines starting with `/` are commands.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use educador_chat::chat::{AgeGroup, ChatMessage, MessageRole};
use educador_chat::config::{AppConfig, Cli};
use educador_chat::session::{ChatSession, SendOutcome, SessionContext};
use educador_chat::storage::{FileStore, SessionId};
use educador_chat::webhook::WebhookClient;

const HELP: &str = "\
Commands:
  /history        show the conversation
  /clear          clear the conversation
  /module <name>  switch module
  /age <group>    switch age group (3-5, 6-8, 9-12)
  /quit           exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = AppConfig::from_cli(&cli).context("Configuration error")?;
    info!(
        name: "chat.config.loaded",
        webhook_url = %config.webhook.url,
        storage_dir = %config.storage.dir.display(),
        "Chat configuration loaded"
    );

    let store = Arc::new(FileStore::new(&config.storage.dir).context("Failed to open storage")?);
    let session_id = match &cli.session_id {
        Some(id) => SessionId::from(id.as_str()),
        None => SessionId::load_or_create(&*store)?,
    };
    let processor = Arc::new(WebhookClient::new(
        config.webhook_url()?,
        config.webhook_timeout(),
    )?);

    let session = ChatSession::initialize(
        SessionContext {
            session_id,
            store,
            processor,
            settings: config.chat_settings(),
        },
        config.chat.default_module.clone(),
        config.chat.default_age_group,
    );

    println!(
        "Sesión {} · módulo {} · {} (escribe /help)",
        session.session_id(),
        session.module(),
        session.age_group().label()
    );
    for message in session.messages() {
        print_message(&message);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match parse_command(&line) {
            Some(Command::Quit) => break,
            Some(Command::Help) => println!("{HELP}"),
            Some(Command::History) => session.messages().iter().for_each(print_message),
            Some(Command::Clear) => {
                session.clear_messages();
                session.messages().iter().for_each(print_message);
            }
            Some(Command::Module(module)) => {
                session.set_module(module);
                println!("Módulo: {}", session.module());
            }
            Some(Command::Age(raw)) => match raw.parse::<AgeGroup>() {
                Ok(group) if config.is_recognized(group) => {
                    session.set_age_group(group);
                    println!("Edad: {}", group.label());
                }
                Ok(group) => println!("Grupo de edad no disponible: {group}"),
                Err(e) => println!("{e}"),
            },
            Some(Command::Unknown(cmd)) => println!("Comando desconocido: {cmd}\n{HELP}"),
            None => {
                let outcome = session.send_message(&line, None).await;
                if matches!(outcome, SendOutcome::Replied | SendOutcome::Failed) {
                    if let Some(reply) = session.messages().last() {
                        print_message(reply);
                    }
                }
            }
        }
    }

    session.close();
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (json_layer, text_layer) = if json {
        (Some(fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (
            None,
            Some(fmt::layer().with_target(true).with_writer(std::io::stderr)),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

fn print_message(message: &ChatMessage) {
    let who = match message.role {
        MessageRole::User => "tú",
        MessageRole::Assistant if message.is_error() => "asistente (error)",
        MessageRole::Assistant => "asistente",
        MessageRole::System => "sistema",
    };
    println!(
        "[{}] {who}: {}",
        message.timestamp.format("%H:%M"),
        message.content
    );
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Help,
    History,
    Clear,
    Quit,
    Module(&'a str),
    Age(&'a str),
    Unknown(&'a str),
}

/// Lines starting with `/` are commands; everything else is a message.
fn parse_command(line: &str) -> Option<Command<'_>> {
    let rest = line.trim().strip_prefix('/')?;
    let (name, arg) = rest.split_once(' ').unwrap_or((rest, ""));
    let arg = arg.trim();
    Some(match name {
        "help" => Command::Help,
        "history" => Command::History,
        "clear" => Command::Clear,
        "quit" | "exit" => Command::Quit,
        "module" if !arg.is_empty() => Command::Module(arg),
        "age" if !arg.is_empty() => Command::Age(arg),
        _ => Command::Unknown(rest),
    })
}
