//! 应用服务层

pub mod handlers;
pub mod services;

pub use handlers::BroadcastHandler;
pub use services::SseClusterService;
