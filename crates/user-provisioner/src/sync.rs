//! Reconciles the local credential file into the cluster secret consumed by
//! the identity provider.
//!
//! The remote value is never merged: every sync replaces the secret's
//! `htpasswd` key with the full current file contents, so the secret always
//! equals the last successfully pushed snapshot.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use snafu::{ResultExt, Snafu};
use tokio::{fs, sync::Mutex, time::timeout};
use tracing::{debug, info, instrument};

use crate::client::Client;

pub const DEFAULT_SECRET_NAME: &str = "users";
pub const DEFAULT_SECRET_NAMESPACE: &str = "openshift-config";

/// Key under which the identity provider expects the htpasswd payload.
pub const HTPASSWD_SECRET_KEY: &str = "htpasswd";

const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(15);

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read credential file {path:?}"))]
    ReadCredentialFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to retrieve secret \"{name}\" in namespace \"{namespace}\""))]
    GetSecret {
        source: kube::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to create secret \"{name}\" in namespace \"{namespace}\""))]
    CreateSecret {
        source: kube::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to replace secret \"{name}\" in namespace \"{namespace}\""))]
    ReplaceSecret {
        source: kube::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display(
        "{operation} of secret \"{name}\" in namespace \"{namespace}\" timed out after {timeout:?}"
    ))]
    OperationTimeout {
        operation: String,
        name: String,
        namespace: String,
        timeout: Duration,
    },
}

/// Pushes the local htpasswd file into one fixed (name, namespace) secret.
///
/// Syncs against the same secret are serialized by a per-instance lock; the
/// read-then-write cycle additionally carries the fetched `resourceVersion`,
/// so a replace racing an external writer is rejected by the API server and
/// surfaces as [`Error::ReplaceSecret`] instead of silently losing an update.
pub struct SecretSynchronizer {
    client: Client,
    name: String,
    namespace: String,
    api_timeout: Duration,
    sync_lock: Mutex<()>,
}

impl SecretSynchronizer {
    pub fn new(client: Client, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            namespace: namespace.into(),
            api_timeout: DEFAULT_API_TIMEOUT,
            sync_lock: Mutex::new(()),
        }
    }

    /// Upper bound on a single cluster API call.
    pub fn with_api_timeout(mut self, api_timeout: Duration) -> Self {
        self.api_timeout = api_timeout;
        self
    }

    /// Reconciles the current contents of `local_file` into the secret and
    /// returns a human-readable confirmation.
    ///
    /// The file is re-read on every call, on the replace path too, so the
    /// pushed value is always the current store and never a stale snapshot.
    #[instrument(skip(self, local_file), fields(name = %self.name, namespace = %self.namespace))]
    pub async fn sync(&self, local_file: &Path) -> Result<String> {
        let _guard = self.sync_lock.lock().await;

        let contents =
            fs::read_to_string(local_file)
                .await
                .with_context(|_| ReadCredentialFileSnafu {
                    path: local_file.to_path_buf(),
                })?;

        let existing: Option<Secret> = self
            .bounded("retrieval", self.client.get_opt(&self.name, &self.namespace))
            .await?
            .context(GetSecretSnafu {
                name: self.name.clone(),
                namespace: self.namespace.clone(),
            })?;

        match existing {
            Some(current) => {
                debug!("secret exists, replacing htpasswd payload");

                // Only the resourceVersion is taken over from the fetched
                // object; the payload is the freshly read local file.
                let desired = self.desired_secret(contents, current.metadata.resource_version);
                self.bounded(
                    "replacement",
                    self.client.replace(&desired, &self.name, &self.namespace),
                )
                .await?
                .context(ReplaceSecretSnafu {
                    name: self.name.clone(),
                    namespace: self.namespace.clone(),
                })?;
            }
            None => {
                debug!("secret not found, creating it");

                let desired = self.desired_secret(contents, None);
                self.bounded("creation", self.client.create(&desired, &self.namespace))
                    .await?
                    .context(CreateSecretSnafu {
                        name: self.name.clone(),
                        namespace: self.namespace.clone(),
                    })?;
            }
        }

        info!("credential secret synchronized");
        Ok(format!(
            "applied htpasswd contents to secret \"{}\" in namespace \"{}\"",
            self.name, self.namespace
        ))
    }

    /// Applies the API timeout to one remote call, keeping the timeout error
    /// kind distinct from transport errors.
    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = kube::Result<T>>,
    ) -> Result<kube::Result<T>> {
        match timeout(self.api_timeout, call).await {
            Ok(result) => Ok(result),
            Err(_) => OperationTimeoutSnafu {
                operation,
                name: self.name.clone(),
                namespace: self.namespace.clone(),
                timeout: self.api_timeout,
            }
            .fail(),
        }
    }

    fn desired_secret(&self, contents: String, resource_version: Option<String>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version,
                ..ObjectMeta::default()
            },
            string_data: Some(BTreeMap::from([(HTPASSWD_SECRET_KEY.to_owned(), contents)])),
            ..Secret::default()
        }
    }
}
