//! 节点装配与生命周期

pub mod background;
pub mod bootstrap;
pub mod wire;

pub use bootstrap::{ApplicationBootstrap, ClusterNode};
pub use wire::ApplicationContext;
