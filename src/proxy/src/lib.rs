pub mod error;
pub mod plugin;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod upstream;
