pub mod auth;
pub mod logging;
pub mod rate_limit;

pub use auth::{auth_middleware, AuthenticatedTherapist};
pub use rate_limit::RateLimiter;
