//! Command-line frontend: a voice session driver and a text chat REPL.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};

use medibook::config::AgentConfig;
use medibook::core::appointments::AppointmentStore;
use medibook::core::intents::IntentDispatcher;
use medibook::core::session::{SessionController, SessionEvent};
use medibook::core::text::TextTurnHandler;
use medibook::core::transcript::Conversation;
use medibook::core::webhook::WebhookSink;

#[derive(Parser)]
#[command(name = "medibook", version, about = "Conversational appointment booking assistant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open an interactive voice session (requires microphone and speaker).
    Voice,
    /// Chat with the assistant over text.
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("medibook=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::from_env()?;

    let (store, changes_rx) = AppointmentStore::new();
    let store = Arc::new(Mutex::new(store));
    WebhookSink::new(config.webhook_url.clone()).spawn_forwarder(changes_rx);

    let dispatcher = IntentDispatcher::new(store);
    let conversation = Arc::new(Mutex::new(Conversation::new()));

    match cli.command {
        Command::Voice => run_voice(config, dispatcher, conversation).await,
        Command::Chat => run_chat(config, dispatcher, conversation).await,
    }
}

async fn run_voice(
    config: AgentConfig,
    dispatcher: IntentDispatcher,
    conversation: Arc<Mutex<Conversation>>,
) -> anyhow::Result<()> {
    let (mut controller, mut events_rx) = SessionController::new(config, dispatcher, conversation);

    println!("Voice session commands: start, pause, resume, stop, reset, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::StateChanged(state) => {
                        println!("[session] {state:?}");
                    }
                    SessionEvent::LiveTranscript { speaker, text } => {
                        println!("[{speaker}…] {text}");
                    }
                    SessionEvent::TurnCommitted(turn) => {
                        println!("{}: {}", turn.speaker, turn.text);
                    }
                    SessionEvent::ConnectionLost { reason } => {
                        match reason {
                            Some(reason) => println!("[session] connection lost: {reason}"),
                            None => println!("[session] connection closed by server"),
                        }
                        controller.stop().await;
                    }
                    SessionEvent::Error(e) => {
                        eprintln!("[session] error: {e}");
                    }
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "start" => {
                        if let Err(e) = controller.start().await {
                            eprintln!("failed to start session: {e}");
                        }
                    }
                    "pause" => controller.pause().await,
                    "resume" => controller.resume().await,
                    "stop" => controller.stop().await,
                    "reset" => {
                        if controller.reset_conversation() {
                            println!("conversation cleared");
                        } else {
                            println!("stop the session before resetting");
                        }
                    }
                    "quit" | "exit" => break,
                    "" => {}
                    other => println!("unknown command: {other}"),
                }
            }
        }
    }

    controller.stop().await;
    Ok(())
}

async fn run_chat(
    config: AgentConfig,
    dispatcher: IntentDispatcher,
    conversation: Arc<Mutex<Conversation>>,
) -> anyhow::Result<()> {
    let handler = TextTurnHandler::new(&config, dispatcher, conversation);

    println!("Type a message, or \"quit\" to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message == "quit" || message == "exit" {
            break;
        }

        // First turn is the echoed user message, skip it.
        for turn in handler.send_message(message).await.into_iter().skip(1) {
            println!("{}: {}", turn.speaker, turn.text);
        }
    }

    Ok(())
}
