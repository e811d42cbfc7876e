mod auth;
mod dto;
mod error;
mod handlers;
pub mod server;

pub use auth::Claims;
