pub mod handler;
pub mod middleware;
pub mod proxy;
pub mod server;
