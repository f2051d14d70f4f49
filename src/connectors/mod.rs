//! Provider connectors
//!
//! Each supported provider implements the [`CredentialBroker`] trait for the
//! OAuth authorization-code flow and token upkeep. The Gmail connector also
//! carries the message API used by the ingest layer.

pub mod broker;
pub mod expiry;
pub mod gmail;
pub mod slack;

pub use broker::{ConnectorError, CredentialBroker};
pub use gmail::GmailConnector;
pub use slack::SlackConnector;
