pub mod error;
pub mod health;
pub mod messages;
pub mod middleware;
pub mod state;

pub use error::ApiError;
pub use state::AppState;
