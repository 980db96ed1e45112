mod error;
pub mod models;
mod rate_limit;
mod server;
pub mod services;
pub mod state;
mod thumbnail;
pub(crate) mod utils;
mod validation;

pub use error::ApiError;
pub use rate_limit::{ClientKey, RateLimiter};
pub use server::{router, run};
pub use state::AppState;
pub use thumbnail::{Thumbnail, ThumbnailClient, ThumbnailError};
