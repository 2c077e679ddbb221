pub mod channel;
pub mod error;
pub mod frame;
pub mod subscribers;
pub mod transport;

pub use channel::ChannelClient;
pub use error::ChannelError;
pub use subscribers::SubscriptionHandle;
pub use transport::{Connector, Transport, WsConnector};
