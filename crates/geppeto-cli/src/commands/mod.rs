//! Slash commands for interactive mode

mod conversation;
mod model;
mod settings;

use std::path::PathBuf;

use crate::app::App;

/// A parsed slash command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    New(Option<String>),
    List,
    Switch(String),
    Delete(Option<String>),
    Clear,
    Title,
    Model(Option<String>),
    /// `/settings [key value]`
    Settings(Option<(String, String)>),
    /// `None` restores the default system message
    System(Option<String>),
    Persona(Option<String>),
    Attach(PathBuf),
    Sync,
    Quit,
    /// Known command, wrong arguments
    Usage(&'static str),
    Unknown(String),
}

/// Result of executing a slash command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the model)
    Message(String),
    /// Exit the application
    Exit,
}

/// Parse a slash command; `None` when `input` is a chat message
pub fn parse_command(input: &str) -> Option<Command> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");
    let arg = (!args.is_empty()).then(|| args.to_string());

    Some(match command.as_str() {
        "help" | "h" | "?" => Command::Help,
        "new" | "n" => Command::New(arg),
        "list" | "ls" | "l" => Command::List,
        "switch" | "s" => match arg {
            Some(target) => Command::Switch(target),
            None => Command::Usage("/switch <number|id>"),
        },
        "delete" | "rm" => Command::Delete(arg),
        "clear" => Command::Clear,
        "title" | "t" => Command::Title,
        "model" | "m" => Command::Model(arg),
        "settings" => match args.split_once(char::is_whitespace) {
            Some((key, value)) => {
                Command::Settings(Some((key.to_lowercase(), value.trim().to_string())))
            }
            None if args.is_empty() => Command::Settings(None),
            None => Command::Usage("/settings [max_tokens|creativity <value|default>]"),
        },
        "system" => Command::System(arg),
        "persona" | "p" => Command::Persona(arg),
        "attach" | "a" => match arg {
            Some(path) => Command::Attach(PathBuf::from(path)),
            None => Command::Usage("/attach <path>"),
        },
        "sync" => Command::Sync,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(command),
    })
}

/// Execute a parsed command against the session
pub async fn execute(command: Command, app: &App) -> anyhow::Result<CommandResult> {
    let message = match command {
        Command::Help => help_message(),
        Command::New(title) => conversation::new(app, title).await?,
        Command::List => conversation::list(app).await?,
        Command::Switch(target) => conversation::switch(app, &target).await?,
        Command::Delete(target) => conversation::delete(app, target.as_deref()).await?,
        Command::Clear => conversation::clear(app).await?,
        Command::Title => conversation::title(app).await?,
        Command::Model(query) => model::execute(app, query.as_deref()).await?,
        Command::Settings(change) => settings::settings(app, change).await?,
        Command::System(text) => settings::system(app, text).await?,
        Command::Persona(title) => settings::persona(app, title.as_deref()).await?,
        Command::Attach(path) => settings::attach(app, &path).await?,
        Command::Sync => settings::sync(app).await?,
        Command::Quit => return Ok(CommandResult::Exit),
        Command::Usage(usage) => format!("Usage: {}", usage),
        Command::Unknown(command) => format!(
            "Unknown command: /{}\nType /help for available commands.",
            command
        ),
    };
    Ok(CommandResult::Message(message))
}

/// The active conversation's id, activating one if needed
async fn active_id(app: &App) -> anyhow::Result<String> {
    Ok(app.store().ensure_active().await?.id)
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?             Show this help message
  /new, /n [title]          Start a new conversation
  /list, /ls                List conversations, most recent first
  /switch, /s <n|id>        Switch to a conversation by list number or id
  /delete, /rm [n|id]       Delete a conversation (the active one by default)
  /clear                    Delete every conversation
  /title, /t                Generate a new title for this conversation
  /model, /m [name]         List models or switch this conversation's model
  /settings [key value]     Show or change this conversation's settings
  /system [text]            Set this conversation's system message (no text resets it)
  /persona, /p [title]      List personas or apply one
  /attach, /a <path>        Attach a text file as knowledge
  /sync                     Pull remote conversations and push this one
  /quit, /exit, /q          Exit geppeto

Press Ctrl-C while a reply is streaming to stop it."#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_command("hello there"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("/help"), Some(Command::Help));
        assert_eq!(parse_command("  /Q "), Some(Command::Quit));
        assert_eq!(parse_command("/new"), Some(Command::New(None)));
        assert_eq!(
            parse_command("/new Trip planning"),
            Some(Command::New(Some("Trip planning".into())))
        );
        assert_eq!(parse_command("/switch 2"), Some(Command::Switch("2".into())));
        assert_eq!(parse_command("/delete"), Some(Command::Delete(None)));
        assert_eq!(parse_command("/model gpt-4"), Some(Command::Model(Some("gpt-4".into()))));
        assert_eq!(
            parse_command("/system Talk like a pirate"),
            Some(Command::System(Some("Talk like a pirate".into())))
        );
        assert_eq!(
            parse_command("/attach notes.md"),
            Some(Command::Attach(PathBuf::from("notes.md")))
        );
        assert_eq!(parse_command("/frobnicate"), Some(Command::Unknown("frobnicate".into())));
    }

    #[test]
    fn test_parse_settings() {
        assert_eq!(parse_command("/settings"), Some(Command::Settings(None)));
        assert_eq!(
            parse_command("/settings creativity 0.5"),
            Some(Command::Settings(Some(("creativity".into(), "0.5".into()))))
        );
        assert!(matches!(parse_command("/settings creativity"), Some(Command::Usage(_))));
    }

    #[test]
    fn test_missing_arguments() {
        assert!(matches!(parse_command("/switch"), Some(Command::Usage(_))));
        assert!(matches!(parse_command("/attach"), Some(Command::Usage(_))));
    }

    #[tokio::test]
    async fn test_quit_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let app = crate::app::tests::open_app(dir.path()).await;
        assert_eq!(execute(Command::Quit, &app).await.unwrap(), CommandResult::Exit);
        match execute(Command::Unknown("x".into()), &app).await.unwrap() {
            CommandResult::Message(message) => assert!(message.contains("/help")),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
