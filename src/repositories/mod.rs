//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM
//! operations for database entities, providing a clean API for data access
//! with user-scoped methods.

pub mod connection;
pub mod email;
pub mod oauth_state;
pub mod token;

pub use connection::ConnectionRepository;
pub use email::EmailRepository;
pub use oauth_state::OAuthStateRepository;
pub use token::TokenRepository;
