pub mod cluster_service;

pub use cluster_service::SseClusterService;
