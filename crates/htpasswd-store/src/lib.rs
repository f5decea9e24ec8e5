//! Management of a flat htpasswd credential file.
//!
//! The store owns a single `users.htpasswd` file with one `username:hash`
//! line per user and offers an idempotent upsert keyed by username. Hashing
//! is delegated to a [`CredentialHasher`], usually the external `htpasswd`
//! tool in bcrypt batch mode, so an in-process implementation can be swapped
//! in without touching callers.

pub mod hash;
pub mod store;
pub mod validation;

pub use hash::{CredentialHasher, HashMode, HtpasswdCommand};
pub use store::HtpasswdStore;
