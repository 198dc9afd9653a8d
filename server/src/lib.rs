pub mod api;
pub mod artifacts;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod middleware;
pub mod observe;
pub mod prompts;
pub mod provider;
pub mod sanitize;
pub mod search;
pub mod session_store;
pub mod state;
pub mod tools;

pub use state::AppState;
