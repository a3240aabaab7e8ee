pub mod persistence;
pub mod transport;
