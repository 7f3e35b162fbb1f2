//! geppeto - chat with OpenAI-compatible models from the terminal

mod app;
mod commands;
mod config;

use std::io::Write;

use clap::Parser;
use geppeto_ai::Role;
use geppeto_chat::{ChatEvent, SendOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use app::App;
use commands::CommandResult;

/// geppeto - chat with OpenAI-compatible models
#[derive(Parser, Debug)]
#[command(name = "geppeto")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: gpt-3.5-turbo)
    #[arg(short, long)]
    model: Option<String>,

    /// Send a single message and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Resume a conversation by ID
    #[arg(long)]
    conversation: Option<String>,

    /// List saved conversations
    #[arg(long)]
    list: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("geppeto=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let settings = config::Config::load().resolve(args.model);
    let app = App::open(&settings).await?;

    // List conversations and exit
    if args.list {
        let listing = commands::execute(commands::Command::List, &app).await?;
        if let CommandResult::Message(listing) = listing {
            println!("{}", listing);
        }
        return Ok(());
    }

    if settings.api_key.is_none() {
        eprintln!("Error: No API key found");
        eprintln!();
        eprintln!("Set your API key with: export OPENAI_API_KEY=your-key");
        eprintln!("Or add it to config file: geppeto --init-config");
        std::process::exit(1);
    }

    let conversation = match args.conversation {
        Some(ref id) => app.store().switch_to(id).await?,
        None => app.store().ensure_active().await?,
    };
    tracing::debug!("Active conversation {}", conversation.id);

    if let Some(command) = args.command {
        return run_command(&app, &command).await;
    }

    run_interactive(&app, &settings.model).await
}

/// Send one message, print the streamed reply and wait for the title
async fn run_command(app: &App, text: &str) -> anyhow::Result<()> {
    let mut events = app.chat.subscribe();
    let outcome = send_and_print(app, &mut events, text).await?;
    if let SendOutcome::Completed {
        title_task: Some(task),
        ..
    } = outcome
    {
        let _ = task.await;
    }
    Ok(())
}

async fn run_interactive(app: &App, model: &str) -> anyhow::Result<()> {
    let mut events = app.chat.subscribe();

    // Show minimal startup info (only if TTY)
    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        let title = app
            .store()
            .current()
            .map(|c| c.title)
            .unwrap_or_default();
        eprintln!("geppeto ({}) conversation: {}", model, title);
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        // events from background title generation
        drain_events(&mut events);
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        // EOF
        let Some(line) = line else {
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = commands::parse_command(input) {
            match commands::execute(command, app).await {
                Ok(CommandResult::Message(message)) => println!("{}", message),
                Ok(CommandResult::Exit) => break,
                Err(e) => eprintln!("Error: {:#}", e),
            }
            continue;
        }

        if let Err(e) = send_and_print(app, &mut events, input).await {
            eprintln!("Error: {:#}", e);
        }
    }

    Ok(())
}

/// Send a message while printing its events; Ctrl-C stops the generation
async fn send_and_print(
    app: &App,
    events: &mut broadcast::Receiver<ChatEvent>,
    text: &str,
) -> anyhow::Result<SendOutcome> {
    let send = app.chat.send_message(text);
    tokio::pin!(send);

    let outcome = loop {
        tokio::select! {
            outcome = &mut send => break outcome?,
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Display fell behind, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                app.chat.stop_generation();
            }
        }
    };
    drain_events(events);
    println!();

    match &outcome {
        SendOutcome::Cancelled => eprintln!("[stopped]"),
        SendOutcome::NoActiveConversation => eprintln!("No active conversation; use /new"),
        SendOutcome::Completed { .. } | SendOutcome::Rejected(_) => {}
    }
    Ok(outcome)
}

fn drain_events(events: &mut broadcast::Receiver<ChatEvent>) {
    loop {
        match events.try_recv() {
            Ok(event) => print_event(&event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!("Display fell behind, skipped {} events", skipped);
            }
            Err(_) => break,
        }
    }
}

fn print_event(event: &ChatEvent) {
    match event {
        ChatEvent::MessageAdded { message } if message.role == Role::Assistant && !message.is_error => {
            print!("{}", message.text);
        }
        ChatEvent::MessageUpdated {
            delta: Some(delta), ..
        } => {
            print!("{}", delta);
        }
        ChatEvent::GenerationFailed { message, .. } => {
            eprintln!("Error: {}", message);
        }
        ChatEvent::TitleGenerated { title, .. } => {
            eprintln!("[Title: {}]", title);
        }
        _ => return,
    }
    let _ = std::io::stdout().flush();
}
