//! HTTP surface assembly and process lifecycle.

mod health;
mod server;

pub use health::*;
pub use server::*;
