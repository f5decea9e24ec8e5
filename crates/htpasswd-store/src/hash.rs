//! The hashing seam between the credential store and whatever produces the
//! password hashes.
//!
//! [`HtpasswdCommand`] drives the external `htpasswd` tool, which edits the
//! store file itself. The trait therefore hands implementations the file path
//! and a create/update mode instead of only the credentials, and the store
//! treats the returned text as an opaque diagnostic.

use std::{path::Path, process::ExitStatus};

use async_trait::async_trait;
use snafu::{ResultExt, Snafu, ensure};
use tokio::process::Command;
use tracing::debug;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to spawn credential hashing command {program:?}"))]
    SpawnCommand {
        source: std::io::Error,
        program: String,
    },

    #[snafu(display("credential hashing command {program:?} exited with {status}: {stderr}"))]
    CommandFailed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Whether the store file must be created or updated in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashMode {
    Create,
    Update,
}

/// Hashes one username/password pair into the store file.
///
/// Implementations own the file mutation: in `Create` mode the file is
/// (re)initialized with exactly the given entry, in `Update` mode the entry
/// is inserted or overwritten and all other lines are left untouched. The
/// returned string is the tool's human-readable status output.
#[async_trait]
pub trait CredentialHasher: Send + Sync {
    async fn apply(
        &self,
        store_file: &Path,
        username: &str,
        password: &str,
        mode: HashMode,
    ) -> Result<String>;
}

/// Runs the external `htpasswd` tool with bcrypt (`-B`) in batch mode (`-b`).
///
/// Batch mode puts the password on the process argument list; that is the
/// tool's non-interactive contract and the reason the store validates inputs
/// before ever spawning the command.
#[derive(Clone, Debug)]
pub struct HtpasswdCommand {
    program: String,
}

impl Default for HtpasswdCommand {
    fn default() -> Self {
        Self::new("htpasswd")
    }
}

impl HtpasswdCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn build_command(
        &self,
        store_file: &Path,
        username: &str,
        password: &str,
        mode: HashMode,
    ) -> Command {
        let mut cmd = Command::new(&self.program);
        if mode == HashMode::Create {
            cmd.arg("-c");
        }
        cmd.arg("-B")
            .arg("-b")
            .arg(store_file)
            .arg(username)
            .arg(password);
        cmd
    }
}

#[async_trait]
impl CredentialHasher for HtpasswdCommand {
    async fn apply(
        &self,
        store_file: &Path,
        username: &str,
        password: &str,
        mode: HashMode,
    ) -> Result<String> {
        let output = self
            .build_command(store_file, username, password, mode)
            .output()
            .await
            .with_context(|_| SpawnCommandSnafu {
                program: self.program.clone(),
            })?;

        ensure!(
            output.status.success(),
            CommandFailedSnafu {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
        );

        debug!(program = %self.program, user = username, ?mode, "hashed credentials");

        // htpasswd reports "Adding password for user ..." on stderr, so both
        // streams make up the diagnostic.
        let mut diagnostic = String::from_utf8_lossy(&output.stdout).into_owned();
        diagnostic.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(diagnostic)
    }
}
