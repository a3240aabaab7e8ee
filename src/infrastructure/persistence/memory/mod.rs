//! 内存实现，用于单进程多节点测试及本地开发

mod message_bus;
mod store;

pub use message_bus::InMemoryMessageBus;
pub use store::InMemoryKvStore;
