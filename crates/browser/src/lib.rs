//! Chrome-backed implementation of the automation capability.
//!
//! [`Browser`] owns the headless Chrome process for the lifetime of the
//! monitor; [`session::PageSession`] is the scoped per-run tab that
//! implements [`slotwatch_core::PageDriver`].

pub mod cdp;
pub mod session;

pub use session::{Browser, PageSession};
