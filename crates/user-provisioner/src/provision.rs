//! The provisioning pipeline: credential upsert, secret sync, follow-up.

use std::sync::Arc;

use async_trait::async_trait;
use htpasswd_store::{HtpasswdStore, store};
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tracing::{info, instrument};

use crate::sync::{self, SecretSynchronizer};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to upsert credentials for user {username:?}"))]
    UpsertCredentials {
        source: store::Error,
        username: String,
    },

    #[snafu(display("failed to synchronize the credential secret"))]
    SynchronizeSecret { source: sync::Error },

    #[snafu(display("follow-up stage failed for user {username:?}"))]
    RunFollowUp {
        source: FollowUpError,
        username: String,
    },
}

/// Error raised by a follow-up stage.
#[derive(Debug, Snafu)]
#[snafu(display("{message}"))]
pub struct FollowUpError {
    message: String,
}

impl FollowUpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Extension point invoked after a successful sync.
///
/// Applying follow-on cluster resources for the new user ("creation
/// templates") plugs in here; the default stage does nothing.
#[async_trait]
pub trait ProvisionFollowUp: Send + Sync {
    async fn run(&self, username: &str) -> Result<(), FollowUpError>;
}

/// The default follow-up: nothing to apply.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFollowUp;

#[async_trait]
impl ProvisionFollowUp for NoFollowUp {
    async fn run(&self, _username: &str) -> Result<(), FollowUpError> {
        Ok(())
    }
}

/// Diagnostic outputs of both pipeline steps, surfaced to the request layer.
#[derive(Clone, Debug, Serialize)]
pub struct ProvisionReport {
    /// Output of the hashing tool, opaque beyond being human-readable.
    pub credential_output: String,
    /// Confirmation message from the secret synchronizer.
    pub sync_status: String,
}

/// Sequences the user-creation workflow.
pub struct UserProvisioner {
    store: Arc<HtpasswdStore>,
    synchronizer: SecretSynchronizer,
    follow_up: Arc<dyn ProvisionFollowUp>,
}

impl UserProvisioner {
    pub fn new(store: Arc<HtpasswdStore>, synchronizer: SecretSynchronizer) -> Self {
        Self {
            store,
            synchronizer,
            follow_up: Arc::new(NoFollowUp),
        }
    }

    pub fn with_follow_up(mut self, follow_up: Arc<dyn ProvisionFollowUp>) -> Self {
        self.follow_up = follow_up;
        self
    }

    /// Runs the pipeline for one user.
    ///
    /// The sync step is only attempted after a successful upsert, and the
    /// follow-up only after a successful sync; the first failure stops the
    /// pipeline and is reported as that step's error kind.
    #[instrument(skip(self, password))]
    pub async fn provision(&self, username: &str, password: &str) -> Result<ProvisionReport> {
        let credential_output = self
            .store
            .upsert_user(username, password)
            .await
            .context(UpsertCredentialsSnafu { username })?;

        let sync_status = self
            .synchronizer
            .sync(self.store.path())
            .await
            .context(SynchronizeSecretSnafu)?;

        self.follow_up
            .run(username)
            .await
            .context(RunFollowUpSnafu { username })?;

        info!(user = username, "user provisioned");
        Ok(ProvisionReport {
            credential_output,
            sync_status,
        })
    }
}
