/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes three top-level command modules:

- `auth`      — Save and forget Onshape API credentials
- `documents` — List the documents those credentials can access
- `chat`      — Interactive design session on one document
*/

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::documents::{summarize, DocumentClient};
use crate::error::{ContextformError, Result};
use crate::types::{Document, UserCredentials};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

// Special commands parser for interactive sessions
pub mod special_commands;

/// Load saved credentials or explain how to create them.
fn require_credentials(store: &CredentialStore) -> Result<UserCredentials> {
    store.load()?.ok_or_else(|| {
        ContextformError::Credentials(
            "Not signed in. Run `contextform login` first.".to_string(),
        )
        .into()
    })
}

/// Ask a yes/no question on the terminal. Anything but yes is no.
fn confirm(editor: &mut DefaultEditor, question: &str) -> bool {
    match editor.readline(&format!("{question} [y/N] ")) {
        Ok(answer) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

/// Fetch documents, offering a manual retry on each failure.
async fn fetch_documents_with_retry(
    client: &DocumentClient,
    credentials: &UserCredentials,
    editor: &mut DefaultEditor,
) -> Result<Vec<Document>> {
    use colored::Colorize;

    loop {
        match client.list(credentials).await {
            Ok(documents) => return Ok(documents),
            Err(e) => {
                let retryable = matches!(
                    e.downcast_ref::<ContextformError>(),
                    Some(ContextformError::Documents(_))
                );
                eprintln!("{}", e.to_string().red());
                if !retryable || !confirm(editor, "Try again?") {
                    return Err(e);
                }
            }
        }
    }
}

/// Auth command(s)
///
/// Credentials are stored locally and sent to the backend when a session
/// starts; nothing is verified at login time.
pub mod auth {
    use super::*;

    /// Values given on the command line; missing ones are prompted for.
    #[derive(Debug, Default, Clone)]
    pub struct LoginArgs {
        pub email: Option<String>,
        pub name: Option<String>,
        pub access_key: Option<String>,
        pub secret_key: Option<String>,
    }

    /// Save credentials, prompting for anything not supplied
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    /// * `args` - Values supplied on the command line
    pub async fn login(config: Config, args: LoginArgs) -> Result<()> {
        let store = CredentialStore::from_config(&config.storage)?;
        let mut editor = None;

        let credentials = UserCredentials {
            email: value_or_prompt(&mut editor, args.email, "Email")?,
            name: value_or_prompt(&mut editor, args.name, "Name")?,
            access_key: value_or_prompt(&mut editor, args.access_key, "Onshape access key")?,
            secret_key: value_or_prompt(&mut editor, args.secret_key, "Onshape secret key")?,
        };
        store.save(&credentials)?;

        use colored::Colorize;
        println!(
            "{} Signed in as {} <{}>",
            "✓".green(),
            credentials.name.bold(),
            credentials.email
        );
        Ok(())
    }

    /// Forget saved credentials
    pub async fn logout(config: Config) -> Result<()> {
        let store = CredentialStore::from_config(&config.storage)?;
        store.clear()?;
        println!("Signed out.");
        Ok(())
    }

    /// The editor is only created once a prompt is actually needed.
    fn value_or_prompt(
        editor: &mut Option<DefaultEditor>,
        given: Option<String>,
        label: &str,
    ) -> Result<String> {
        if let Some(value) = given.filter(|v| !v.trim().is_empty()) {
            return Ok(value.trim().to_string());
        }
        if editor.is_none() {
            *editor = Some(DefaultEditor::new()?);
        }
        let Some(editor) = editor.as_mut() else {
            return Err(ContextformError::Credentials("Line editor unavailable".to_string()).into());
        };
        loop {
            match editor.readline(&format!("{label}: ")) {
                Ok(line) if !line.trim().is_empty() => return Ok(line.trim().to_string()),
                Ok(_) => eprintln!("{label} is required."),
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    return Err(ContextformError::Credentials("Login cancelled".to_string()).into())
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Document listing command
pub mod documents {
    use super::*;

    /// Print the documents the saved credentials can access
    pub async fn list_documents(config: Config) -> Result<()> {
        use colored::Colorize;

        let store = CredentialStore::from_config(&config.storage)?;
        let credentials = require_credentials(&store)?;
        let client = DocumentClient::new(config.server.documents_url()?)?;
        let mut editor = DefaultEditor::new()?;

        let documents = fetch_documents_with_retry(&client, &credentials, &mut editor).await?;
        if documents.is_empty() {
            println!("No documents found for {}.", credentials.email);
            return Ok(());
        }
        for document in &documents {
            println!("{}  {}", document.id.dimmed(), summarize(document));
        }
        Ok(())
    }

    /// Resolve the document to open: by id when given, else by prompting.
    pub(crate) async fn select_document(
        client: &DocumentClient,
        credentials: &UserCredentials,
        document_id: Option<String>,
        editor: &mut DefaultEditor,
    ) -> Result<Document> {
        let documents = fetch_documents_with_retry(client, credentials, editor).await?;

        if let Some(id) = document_id {
            return documents
                .into_iter()
                .find(|d| d.id == id)
                .ok_or_else(|| {
                    ContextformError::Config(format!("No accessible document with id '{}'", id))
                        .into()
                });
        }

        if documents.is_empty() {
            return Err(ContextformError::Config(
                "No documents found for these credentials".to_string(),
            )
            .into());
        }

        for (index, document) in documents.iter().enumerate() {
            println!("{:>3}. {}", index + 1, summarize(document));
        }
        loop {
            let line = match editor.readline("Select a document: ") {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    return Err(
                        ContextformError::Session("No document selected".to_string()).into(),
                    )
                }
                Err(e) => return Err(e.into()),
            };
            match line.trim().parse::<usize>() {
                Ok(n) if (1..=documents.len()).contains(&n) => {
                    return Ok(documents[n - 1].clone());
                }
                _ => eprintln!("Enter a number between 1 and {}.", documents.len()),
            }
        }
    }
}

// Chat command handler
pub mod chat {
    //! Interactive design session.
    //!
    //! Input is read on a dedicated thread (rustyline blocks) and forwarded
    //! over a channel; a printer task renders every transcript entry the
    //! session publishes.

    use super::special_commands::{parse_special_command, print_help, SpecialCommand};
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use colored::Colorize;
    use tokio::sync::{mpsc, watch};

    use crate::session::{SessionManager, SessionOptions, SessionSnapshot};
    use crate::transport::socketio::{SocketIoOptions, SocketIoTransport};
    use crate::types::{ChatMessage, Sender};

    enum Input {
        Line(String),
        Interrupted,
        Eof,
    }

    /// Start an interactive session
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration (consumed)
    /// * `document_id` - Document to open; prompts when `None`
    pub async fn run_chat(config: Config, document_id: Option<String>) -> Result<()> {
        tracing::info!("Starting interactive session");

        let store = CredentialStore::from_config(&config.storage)?;
        let credentials = require_credentials(&store)?;
        let client = DocumentClient::new(config.server.documents_url()?)?;

        let document = {
            let mut editor = DefaultEditor::new()?;
            documents::select_document(&client, &credentials, document_id, &mut editor).await?
        };

        let transport = SocketIoTransport::connect(
            &config.server.base_url()?,
            SocketIoOptions::from(&config.transport),
        )?;
        let session = SessionManager::start(
            Arc::new(transport),
            credentials,
            document.clone(),
            SessionOptions::from(&config.session),
        );

        print_welcome_banner(&document);
        let printer = tokio::spawn(print_updates(session.subscribe()));
        let mut lines = spawn_input_thread();

        while let Some(input) = lines.recv().await {
            let line = match input {
                Input::Line(line) => line,
                Input::Interrupted => {
                    println!("CTRL-C");
                    break;
                }
                Input::Eof => {
                    println!("CTRL-D");
                    break;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let command = match parse_special_command(trimmed) {
                Ok(command) => command,
                Err(e) => {
                    eprintln!("{}", e.to_string().yellow());
                    continue;
                }
            };

            let result = match command {
                SpecialCommand::None => session.send_message(&line).await,
                SpecialCommand::Exit => break,
                SpecialCommand::Help => {
                    print_help();
                    Ok(())
                }
                SpecialCommand::ShowStatus => {
                    print_status(&document, &session.snapshot());
                    Ok(())
                }
                SpecialCommand::Approve => {
                    if session.snapshot().pending_modification.is_none() {
                        println!("{}", "Nothing to approve.".dimmed());
                    }
                    session.approve_pending_modification().await
                }
                SpecialCommand::Reject => {
                    if session.snapshot().pending_modification.is_none() {
                        println!("{}", "Nothing to reject.".dimmed());
                    }
                    session.reject_pending_modification().await
                }
                SpecialCommand::Refresh => session.request_model_data().await,
                SpecialCommand::Features => {
                    print_features(&session.snapshot());
                    Ok(())
                }
                SpecialCommand::Geometry => session.request_geometry().await,
                SpecialCommand::Memory => show_design_memory(&session).await,
                SpecialCommand::SetParameter {
                    feature_id,
                    parameter_id,
                    value,
                    intent,
                } => {
                    session
                        .modify_parameter(&feature_id, &parameter_id, &value, intent.as_deref())
                        .await
                }
            };

            if let Err(e) = result {
                eprintln!("Error: {}\n", e);
            }
        }

        session.close().await?;
        printer.abort();
        println!("Goodbye!");
        Ok(())
    }

    fn spawn_input_thread() -> mpsc::UnboundedReceiver<Input> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let mut editor = match DefaultEditor::new() {
                Ok(editor) => editor,
                Err(e) => {
                    tracing::error!("Failed to initialize line editor: {}", e);
                    let _ = tx.send(Input::Eof);
                    return;
                }
            };
            loop {
                let input = match editor.readline("> ") {
                    Ok(line) => {
                        if !line.trim().is_empty() {
                            let _ = editor.add_history_entry(line.as_str());
                        }
                        Input::Line(line)
                    }
                    Err(ReadlineError::Interrupted) => Input::Interrupted,
                    Err(ReadlineError::Eof) => Input::Eof,
                    Err(e) => {
                        tracing::error!("Readline error: {:?}", e);
                        Input::Eof
                    }
                };
                let last = !matches!(input, Input::Line(_));
                if tx.send(input).is_err() || last {
                    break;
                }
            }
        });
        rx
    }

    /// Render transcript entries and status changes as they are published.
    async fn print_updates(mut snapshots: watch::Receiver<SessionSnapshot>) {
        let mut printed = 0;
        let mut thinking = false;
        let mut connected = false;
        let mut progress = String::new();

        loop {
            {
                let snapshot = snapshots.borrow_and_update();
                if snapshot.connected != connected {
                    connected = snapshot.connected;
                    let line = if connected {
                        "● connected".green()
                    } else {
                        "○ disconnected, reconnecting…".yellow()
                    };
                    println!("{}", line);
                }
                for message in snapshot.messages.iter().skip(printed) {
                    if message.sender != Sender::User {
                        println!("{}", render_message(message));
                    }
                }
                printed = snapshot.messages.len();

                if snapshot.thinking && !thinking {
                    println!("{}", "… thinking".dimmed());
                }
                thinking = snapshot.thinking;

                if snapshot.modification_progress != progress {
                    progress = snapshot.modification_progress.clone();
                    if !progress.is_empty() {
                        println!("{}", format!("⏳ {progress}").dimmed());
                    }
                }
            }
            if snapshots.changed().await.is_err() {
                break;
            }
        }
    }

    pub(crate) fn render_message(message: &ChatMessage) -> String {
        let time = message
            .timestamp
            .with_timezone(&chrono::Local)
            .format("%H:%M");
        let label = match message.sender {
            Sender::User => "you".green().bold(),
            Sender::Ai => "ai".cyan().bold(),
            Sender::System => "system".yellow().bold(),
        };
        format!("{} {} {}\n", time.to_string().dimmed(), label, message.content)
    }

    async fn show_design_memory(session: &SessionManager) -> Result<()> {
        let mut updates = session.subscribe();
        let before = updates.borrow_and_update().modifications.clone();
        session.request_design_memory().await?;

        let wait = updates.wait_for(|s| s.modifications != before);
        if tokio::time::timeout(Duration::from_secs(3), wait).await.is_err() {
            tracing::debug!("Design memory unchanged or not yet received");
        }

        let snapshot = session.snapshot();
        if snapshot.modifications.is_empty() {
            println!("{}", "No recorded design decisions yet.".dimmed());
        }
        for modification in &snapshot.modifications {
            println!(
                "{}  {}.{}: {} → {}  {}",
                modification.timestamp.dimmed(),
                modification.feature_id,
                modification.parameter_id,
                modification.old_value,
                modification.new_value,
                modification.intent.italic()
            );
        }
        Ok(())
    }

    fn print_features(snapshot: &SessionSnapshot) {
        if snapshot.features.is_empty() {
            println!("{}", "No features loaded. Try /refresh.".dimmed());
            return;
        }
        for feature in &snapshot.features {
            let mut line = format!("{} {} ({})", feature.id.dimmed(), feature.name, feature.feature_type);
            if let Some(dimensions) = &feature.dimensions {
                line.push_str(&format!("  [{}]", dimensions.join(", ")));
            }
            if let Some(depth) = &feature.depth {
                line.push_str(&format!("  depth {depth}"));
            }
            println!("{line}");
        }
    }

    fn print_status(document: &Document, snapshot: &SessionSnapshot) {
        let connection = if snapshot.connected {
            "connected".green()
        } else {
            "disconnected".red()
        };
        println!("Document:     {}", document.name.bold());
        println!("Connection:   {}", connection);
        println!("Thinking:     {}", if snapshot.thinking { "yes" } else { "no" });
        println!("Features:     {}", snapshot.features.len());
        println!(
            "Geometry:     {}",
            if snapshot.geometry.is_some() { "loaded" } else { "none" }
        );
        match &snapshot.pending_modification {
            Some(pending) => println!(
                "Pending:      {}.{} {} → {}{}",
                pending.feature_id,
                pending.parameter_id,
                pending.old_value,
                pending.new_value,
                if pending.applied { " (applied)" } else { "" }
            ),
            None => println!("Pending:      none"),
        }
        println!("Decisions:    {}", snapshot.modifications.len());
    }

    fn print_welcome_banner(document: &Document) {
        println!();
        println!("{}", "contextform".bold().cyan());
        println!("Document: {}", summarize(document));
        println!("Type a request, or /help for commands.");
        println!();
    }

}
