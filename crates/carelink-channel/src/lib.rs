pub mod channel;
pub mod policy;
pub mod socket;
pub mod ws;

pub use channel::PersistentMessageChannel;
pub use policy::{ConstantDelay, ExponentialBackoff, ReconnectPolicy};
pub use socket::{LinkEvent, LinkSink, LinkStream, SocketConnector};
pub use ws::WsConnector;
