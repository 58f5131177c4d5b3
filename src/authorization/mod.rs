//! Outbound Transfer Authorization
//!
//! Gate that must pass before a money transfer executes: an ordered sequence
//! of single-use, 9-character verification codes, delivered out-of-band and
//! validated strictly in order.
//!
//! # State Machine
//!
//! ```text
//! PENDING ──match, not last──▶ EXECUTING ──match, last──▶ COMPLETED
//!    │  ╲                          │
//!    │   ╲──match, last────────────┼──────────────────────▶ COMPLETED
//!    │                             │
//!    ├── 3rd mismatch on a code ───┴──▶ BLOCKED    (terminal)
//!    ├── now > expires_at ─────────────▶ EXPIRED    (terminal)
//!    └── operator cancel ──────────────▶ CANCELLED  (terminal)
//! ```
//!
//! EXECUTING only records that the chain has started; it accepts exactly the
//! operations PENDING does. A lapsed window is committed as EXPIRED by whichever
//! operation touches the request first: submit, cancel, resend, current-code
//! lookup, or the sweeper.
//!
//! # Invariants
//!
//! 1. **One active code**: at most one code is `Pending`; earlier codes are `Validated`
//! 2. **Fixed window**: `expires_at = created_at + 24h`, never extended
//! 3. **Single counter**: failed attempts live on each code; the request total is derived
//! 4. **Append-only audit**: every evaluated submission leaves an [`AttemptLog`]
//! 5. **Persist-before-deliver**: transitions are saved before the gateway is called

pub mod clock;
pub mod code;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod types;

#[cfg(test)]
mod integration_tests;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::AuthorizationEngine;
pub use error::AuthorizationError;
pub use notifier::{DeliveryContext, NotificationGateway};
pub use state::{CodeStatus, TransferStatus};
pub use store::{InMemoryTransferStore, TransferStore};
pub use sweeper::SweepWorker;
pub use types::{
    AttemptId, AttemptLog, AttemptResult, ClientMetadata, CodeDescriptor, CodePolicy,
    NewTransferRequest, TransferReference, TransferRequest, VerificationCode,
};
