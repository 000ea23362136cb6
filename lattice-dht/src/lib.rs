pub mod announce;
pub mod dht;
pub mod error;
pub mod keys;
pub mod relay;

pub use dht::MAX_MOTD_LENGTH;
