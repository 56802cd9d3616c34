//! replica-daemon library: Exposes the daemon components for the binary
//! and for integration tests.

pub mod config;
pub mod connection;
pub mod console;
pub mod export;
pub mod file_cache;
pub mod mesh;
pub mod session;

pub use config::{Args, ConfigError, SessionConfig};
pub use connection::{ConnId, ConnectionEvent, PeerConnection};
pub use console::{ConsoleCommand, ParseError};
pub use export::{ExportReport, export_workspace};
pub use file_cache::FileBlobStore;
pub use mesh::Mesh;
pub use session::{SessionError, SessionHandle, SessionView};
