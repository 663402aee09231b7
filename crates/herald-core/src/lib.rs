//! # Herald Core
//! Shared types, collaborator traits, error taxonomy, and configuration.
//!
//! Everything the engine talks to lives behind a trait defined here:
//! the remote messaging API (`Transport`), the operator's chat (`OperatorUi`)
//! and the document store holding users and channels (`TargetRepository`).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::HeraldConfig;
pub use error::{HeraldError, Result, TransportError};
