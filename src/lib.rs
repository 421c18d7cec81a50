//! Sealpost - end-to-end encrypted direct-messaging relay.
//!
//! Clients exchange RSA public keys through the relay, then send each other
//! messages sealed with a per-message AES-256-GCM key that is wrapped with
//! the recipient's RSA-OAEP key. The relay only routes: it never sees a
//! private key or a plaintext.
//!
//! # Architecture
//!
//! - **Hub** - single task owning the directory and the relay state machine
//! - **Server** - WebSocket adapter, one read/write task pair per connection
//! - **Client** - key cache, roster and cipher for one user, plus transport
//!
//! # Modules
//!
//! - [`envelope`] - wire formats for public keys and encrypted envelopes
//! - [`crypto`] - hybrid RSA-OAEP + AES-GCM cipher
//! - [`directory`] - identity ↔ session table
//! - [`credentials`] - first-come credential guard
//! - [`hub`] - relay protocol state machine
//! - [`server`] - WebSocket listener
//! - [`client`] - client session and connection
//! - [`config`] - server configuration

pub mod client;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod directory;
pub mod envelope;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod server;

// Re-export commonly used types
pub use client::{ClientConnection, ClientNotice, ClientSession};
pub use config::ServerConfig;
pub use credentials::{CredentialGuard, FileCredentials, MemoryCredentials};
pub use crypto::KeyPair;
pub use directory::{Directory, SessionId};
pub use envelope::Envelope;
pub use error::{CryptoError, DirectoryError, RegisterError};
pub use hub::{Hub, HubHandle, SessionState};
pub use protocol::{ClientRequest, ServerEvent};
pub use server::Server;
