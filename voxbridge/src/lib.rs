pub mod aec;
pub mod api;
pub mod audio;
pub mod call;
pub mod config;
pub mod gate;

mod bridge;
mod error;

pub use bridge::Bridge;
pub use error::{Error, Result};
pub use voxbridge_session as session;

pub const DEFAULT_API_URL: &str = "https://api.vapi.ai";
