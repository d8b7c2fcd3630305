//! IPC module for status queries, key press injection and notifications

mod protocol;
mod server;

pub use server::Server;
