pub mod broadcast_handler;

pub use broadcast_handler::BroadcastHandler;
