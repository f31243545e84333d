//! License server client and the gate a distribution run must pass.
//!
//! The server speaks a small JSON protocol:
//!
//! - `GET /health`
//! - `POST /api/validate {hardware_id, groups_count, cards_to_send}`
//! - `POST /api/usage {hardware_id, groups_used, cards_sent}`
//! - `POST /api/activate {hardware_id, activation_code}`
//!
//! [`LicenseClient`] implements [`LicenseGate`], the seam the run controller
//! depends on. With the `test-support` feature, [`StaticLicenseGate`] gives a
//! scripted in-memory gate.

mod client;
mod error;
mod fingerprint;
mod gate;
#[cfg(any(test, feature = "test-support"))]
mod testing;

pub use client::{ActivationOutcome, LicenseClient, REQUEST_TIMEOUT};
pub use error::{LicenseError, LicenseResult};
pub use fingerprint::hardware_fingerprint;
pub use gate::{
    AccountId, AccountInfo, LicenseDecision, LicenseGate, FREE_PLAN_MAX_CARDS_PER_DAY,
    FREE_PLAN_MAX_GROUPS,
};
#[cfg(any(test, feature = "test-support"))]
pub use testing::StaticLicenseGate;
