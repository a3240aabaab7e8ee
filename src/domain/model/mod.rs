pub mod connection;
pub mod keys;
pub mod message;
pub mod node;
pub mod status;

pub use connection::{Connection, TerminalReason};
pub use keys::KeySpace;
pub use message::{ClusterMessage, PushEvent, events};
pub use node::NodeRecord;
pub use status::{CloseOutcome, ConnectionStatus, NodeStats, RouteOutcome, RouteReceipt};
