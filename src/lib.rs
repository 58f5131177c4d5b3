//! Transfer Authorization
//!
//! Multi-step authorization of outbound money transfers: every transfer must
//! pass an ordered sequence of out-of-band verification codes before it executes.
//!
//! # Modules
//!
//! - [`authorization`] - Request lifecycle, code challenges, lockout and expiry
//! - [`money`] - Validated monetary amounts
//! - [`config`] - YAML configuration per environment
//! - [`logging`] - Tracing subscriber setup

pub mod authorization;
pub mod config;
pub mod logging;
pub mod money;

// Convenient re-exports at crate root
pub use authorization::{
    AttemptResult, AuthorizationEngine, AuthorizationError, ClientMetadata, NewTransferRequest,
    TransferReference, TransferRequest, TransferStatus,
};
pub use money::{Amount, MoneyError};
