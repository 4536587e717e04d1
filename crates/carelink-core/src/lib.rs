pub mod auth;
pub mod config;
pub mod error;
pub mod types;

pub use auth::{EnvToken, StaticToken, TokenProvider};
pub use config::AppConfig;
pub use error::{AudioError, ChannelError, ConfigError, StreamError};
pub use types::{ChannelState, ChatMessage, PcmBuffer, StreamEvent};
