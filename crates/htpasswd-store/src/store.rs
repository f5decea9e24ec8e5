//! The on-disk credential store.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use snafu::{ResultExt, Snafu};
use tokio::{fs, sync::Mutex, time::timeout};
use tracing::{debug, info, instrument};

use crate::{
    hash::{self, CredentialHasher, HashMode},
    validation,
};

pub const HTPASSWD_FILE_NAME: &str = "users.htpasswd";

const DEFAULT_HASH_TIMEOUT: Duration = Duration::from_secs(10);

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid username {username:?}"))]
    InvalidUsername {
        source: validation::Error,
        username: String,
    },

    #[snafu(display("invalid password for user {username:?}"))]
    InvalidPassword {
        source: validation::Error,
        username: String,
    },

    #[snafu(display("failed to create content root {path:?}"))]
    CreateContentRoot {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to check for credential file {path:?}"))]
    StatCredentialFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to hash credentials for user {username:?}"))]
    HashCredentials {
        source: hash::Error,
        username: String,
    },

    #[snafu(display("hashing credentials for user {username:?} timed out after {timeout:?}"))]
    HashTimeout { username: String, timeout: Duration },

    #[snafu(display("failed to read credential file {path:?}"))]
    ReadCredentialFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to write credential file {path:?}"))]
    WriteCredentialFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to move credential file into place at {path:?}"))]
    PersistCredentialFile {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// A single htpasswd file plus the lock serializing its writers.
///
/// At most one writer may mutate the file at any time, otherwise interleaved
/// tool invocations can corrupt it or drop entries. All mutation therefore
/// goes through the per-store mutex, which only works if every caller shares
/// one instance (behind an [`Arc`]) per file path.
pub struct HtpasswdStore {
    path: PathBuf,
    hasher: Arc<dyn CredentialHasher>,
    hash_timeout: Duration,
    write_lock: Mutex<()>,
}

impl HtpasswdStore {
    /// A store managing `users.htpasswd` inside `content_root`.
    ///
    /// The file is not touched here; it is created by the first upsert.
    pub fn new(content_root: impl Into<PathBuf>, hasher: Arc<dyn CredentialHasher>) -> Self {
        Self {
            path: content_root.into().join(HTPASSWD_FILE_NAME),
            hasher,
            hash_timeout: DEFAULT_HASH_TIMEOUT,
            write_lock: Mutex::new(()),
        }
    }

    /// Upper bound on a single hashing-tool invocation.
    pub fn with_hash_timeout(mut self, hash_timeout: Duration) -> Self {
        self.hash_timeout = hash_timeout;
        self
    }

    /// Location of the store file, for consumers pushing it elsewhere.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts or overwrites the entry for `username`, leaving all other
    /// entries untouched, and returns the hashing tool's status output.
    #[instrument(skip(self, password))]
    pub async fn upsert_user(&self, username: &str, password: &str) -> Result<String> {
        validation::validate_username(username).context(InvalidUsernameSnafu { username })?;
        validation::validate_password(password).context(InvalidPasswordSnafu { username })?;

        let _guard = self.write_lock.lock().await;

        self.ensure_content_root().await?;

        // The mode is decided by the file on disk, not by a cached flag, so
        // process restarts and external file removal cannot desynchronize the
        // store.
        let mode = if fs::try_exists(&self.path)
            .await
            .with_context(|_| StatCredentialFileSnafu {
                path: self.path.clone(),
            })? {
            HashMode::Update
        } else {
            HashMode::Create
        };

        debug!(user = username, ?mode, "upserting credential entry");

        let hashing = self.hasher.apply(&self.path, username, password, mode);
        let output = match timeout(self.hash_timeout, hashing).await {
            Ok(result) => result.context(HashCredentialsSnafu { username })?,
            Err(_) => {
                return HashTimeoutSnafu {
                    username,
                    timeout: self.hash_timeout,
                }
                .fail();
            }
        };

        info!(user = username, "credential entry upserted");
        Ok(output)
    }

    /// Replaces the whole store file with `contents`.
    ///
    /// The new contents become visible atomically: they are staged in a
    /// sibling file and renamed over the store file, so a concurrent reader
    /// never observes a truncated store.
    #[instrument(skip(self, contents))]
    pub async fn set_contents(&self, contents: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        self.ensure_content_root().await?;

        // The fixed staging name is safe, writers are serialized by the lock.
        let staging = self.path.with_file_name(format!("{HTPASSWD_FILE_NAME}.tmp"));
        fs::write(&staging, contents)
            .await
            .with_context(|_| WriteCredentialFileSnafu {
                path: staging.clone(),
            })?;
        fs::rename(&staging, &self.path)
            .await
            .with_context(|_| PersistCredentialFileSnafu {
                path: self.path.clone(),
            })?;

        info!(bytes = contents.len(), "credential store contents replaced");
        Ok(())
    }

    /// Current contents of the store file.
    pub async fn contents(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .await
            .with_context(|_| ReadCredentialFileSnafu {
                path: self.path.clone(),
            })
    }

    async fn ensure_content_root(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|_| CreateContentRootSnafu {
                    path: parent.to_path_buf(),
                })?;
        }

        Ok(())
    }
}
