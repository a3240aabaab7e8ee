mod message_bus;
mod store;

pub use message_bus::RedisMessageBus;
pub use store::RedisKvStore;
