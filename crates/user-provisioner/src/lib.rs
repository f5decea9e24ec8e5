//! Provisioning of login users for a cluster identity provider.
//!
//! A provisioning request runs a two-step pipeline: the credential is
//! upserted into the local htpasswd store, then the store file is pushed
//! wholesale into the `users` secret in `openshift-config`, where the
//! identity provider consumes it. The [`server`] module exposes the pipeline
//! over HTTP.

pub mod client;
pub mod provision;
pub mod server;
pub mod sync;
