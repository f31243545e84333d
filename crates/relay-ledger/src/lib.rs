//! Persistent state for distribution runs.
//!
//! Two JSON artifacts live next to the configuration:
//!
//! - the **ledger** (`{"<channel>": ["item", ...]}`), recording which items
//!   each channel already received so a restarted run never resends them
//! - the **prefix map** (`{"<channel>": "label"}`), the label prepended to
//!   every item sent to a channel
//!
//! Loading never fails: a missing or corrupt file yields an empty store and a
//! warning. Saving goes through a temp file and a rename so a crash mid-write
//! leaves either the old or the new content.

mod atomic;
mod error;
mod ledger;
mod prefix;

pub use atomic::atomic_write_text;
pub use error::{LedgerError, LedgerResult};
pub use ledger::LedgerStore;
pub use prefix::PrefixMap;
