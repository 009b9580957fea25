//! Special commands parser for interactive chat mode
//!
//! This module parses the commands that can be entered during an
//! interactive design session instead of a chat message. Special commands
//! allow users to:
//! - Approve or reject the change the assistant proposed
//! - Refresh or list the model's features
//! - Request geometry or the design memory
//! - Change a parameter directly
//! - View session status, display help, and exit
//!
//! Commands are prefixed with `/` and are case-insensitive.

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
///
/// These commands act on the session rather than being sent to the
/// assistant as chat text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Keep the pending modification
    Approve,

    /// Revert or discard the pending modification
    Reject,

    /// Re-request features and geometry from the backend
    Refresh,

    /// Print the current feature list
    Features,

    /// Request geometry for the viewer
    Geometry,

    /// Request and print the modification history
    Memory,

    /// Change one parameter without going through the chat
    ///
    /// `/set <feature> <parameter> <value> [intent...]`
    SetParameter {
        feature_id: String,
        parameter_id: String,
        value: String,
        intent: Option<String>,
    },

    /// Display connection, thinking, and pending modification status
    ShowStatus,

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command
    ///
    /// The input should be sent as a chat message.
    None,
}

/// Parse a user input string into a special command
///
/// # Errors
///
/// Returns CommandError::UnknownCommand if input starts with "/" but is not a valid command.
/// Returns CommandError::MissingArgument if `/set` is missing any of its arguments.
///
/// # Examples
///
/// ```
/// use contextform::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/approve").unwrap(), SpecialCommand::Approve);
/// assert_eq!(parse_special_command("make it wider").unwrap(), SpecialCommand::None);
/// assert!(parse_special_command("/foo").is_err());
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') && lower != "exit" && lower != "quit" {
        return Ok(SpecialCommand::None);
    }

    let mut parts = trimmed.split_whitespace();
    let head = parts.next().unwrap_or_default().to_lowercase();

    match head.as_str() {
        "/approve" | "/keep" | "/yes" => Ok(SpecialCommand::Approve),
        "/reject" | "/revert" | "/no" => Ok(SpecialCommand::Reject),
        "/refresh" => Ok(SpecialCommand::Refresh),
        "/features" => Ok(SpecialCommand::Features),
        "/geometry" => Ok(SpecialCommand::Geometry),
        "/memory" | "/history" => Ok(SpecialCommand::Memory),
        "/status" => Ok(SpecialCommand::ShowStatus),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/exit" | "/quit" | "exit" | "quit" => Ok(SpecialCommand::Exit),
        "/set" => {
            let args: Vec<&str> = parts.collect();
            if args.len() < 3 {
                return Err(CommandError::MissingArgument {
                    command: "/set".to_string(),
                    usage: "/set <feature> <parameter> <value> [intent...]".to_string(),
                });
            }
            let intent = args[3..].join(" ");
            Ok(SpecialCommand::SetParameter {
                feature_id: args[0].to_string(),
                parameter_id: args[1].to_string(),
                value: args[2].to_string(),
                intent: (!intent.is_empty()).then_some(intent),
            })
        }
        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Display help information for special commands
pub fn print_help() {
    println!(
        r#"
Special Commands for Interactive Design Sessions
================================================

PROPOSED CHANGES:
  /approve        - Keep the change the assistant proposed
  /reject         - Revert or discard the proposed change
  /set <feature> <parameter> <value> [intent]
                  - Change one parameter directly

MODEL:
  /refresh        - Reload features and geometry
  /features       - List the model's features
  /geometry       - Request geometry for the viewer
  /memory         - Show recorded design decisions

SESSION:
  /status         - Show connection and pending change status
  /help           - Show this help message
  /exit           - Leave the session (also: exit, quit)

NOTES:
  - Commands are case-insensitive
  - Everything else is sent to the assistant as a chat message
"#
    );
}
