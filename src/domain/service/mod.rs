pub mod connection_table_service;
pub mod node_health_service;
pub mod presence_service;
pub mod router_service;
pub mod stream_service;

pub use connection_table_service::{ChannelHandle, LocalConnectionTable};
pub use node_health_service::{NodeHealthRegistry, SweepReport};
pub use presence_service::PresenceRegistry;
pub use router_service::{MessageRouter, RouteTarget};
pub use stream_service::PacedStreamer;
