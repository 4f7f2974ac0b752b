// Chatz client library: session, REST, live channel and conversation state
pub mod api;
pub mod client;
pub mod config;
pub mod conversation;
pub mod directory;
pub mod error;
pub mod live;
pub mod models;
pub mod session;

// Re-export main types for convenience
pub use client::{AppEvent, ChatClient, Update};
pub use config::ClientConfig;
pub use error::ChatError;
pub use live::{ChannelState, LiveChannel, LiveEvent};
pub use models::*;
pub use session::{FileStorage, MemoryStorage, Session, SessionStorage, SessionStore};
