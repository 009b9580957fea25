//! contextform - chat-driven CAD modification client library
//!
//! This library connects to a design-assistant backend on behalf of one
//! user and one Onshape document: it keeps the conversation transcript,
//! the model's features and geometry, and the propose/approve/reject cycle
//! for parameter changes in sync with the backend's event stream.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: Session manager and its state machine
//! - `protocol`: Typed outbound and inbound events
//! - `transport`: Transport abstraction, Socket.IO client, and test fake
//! - `documents`: REST document listing
//! - `credentials`: Persisted user credentials
//! - `types`: Domain data (messages, features, modifications)
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface and handlers
//!
//! # Example
//!
//! ```no_run
//! use contextform::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     // Session usage would go here
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod documents;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{ContextformError, DocumentFetchError, Result};
pub use session::{SessionManager, SessionOptions, SessionSnapshot};
pub use transport::{Transport, TransportEvent};
pub use types::{ChatMessage, Document, Sender, UserCredentials};
