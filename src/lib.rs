pub mod audit;
pub mod core;
pub mod llm;
pub mod main_module;
pub mod marketplace;
pub mod messages;
pub mod security;
pub mod teams;
pub mod testdata;
pub mod tickets;
pub mod users;

pub use crate::core::config::AppConfig;
pub use crate::core::shared::state::AppState;
pub use crate::main_module::{build_router, run_server};
