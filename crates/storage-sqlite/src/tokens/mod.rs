//! SQLite-backed OAuth token storage.

mod model;
mod repository;

pub use model::OAuthTokenDB;
pub use repository::TokenRepository;
