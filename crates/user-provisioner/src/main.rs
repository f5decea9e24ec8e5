use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use htpasswd_store::{HtpasswdCommand, HtpasswdStore};
use snafu::{ResultExt, Snafu};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use user_provisioner::{
    client::Client,
    provision::UserProvisioner,
    server,
    sync::{DEFAULT_SECRET_NAME, DEFAULT_SECRET_NAMESPACE, SecretSynchronizer},
};

const LOG_ENV_VAR: &str = "USER_PROVISIONER_LOG";
const FIELD_MANAGER: &str = "user-provisioner";

#[derive(Debug, Parser)]
#[command(
    name = "user-provisioner",
    author,
    version,
    about = "Provisions cluster login users into an htpasswd-backed identity provider"
)]
struct Opts {
    /// Address the provisioning API listens on.
    #[arg(long, env, default_value = "0.0.0.0:8080")]
    bind_address: SocketAddr,

    /// Directory holding the htpasswd credential file.
    #[arg(long, env, default_value = "artifacts")]
    content_root: PathBuf,

    /// Program used to hash credentials into the store file.
    #[arg(long, env, default_value = "htpasswd")]
    htpasswd_program: String,

    /// Name of the secret consumed by the identity provider.
    #[arg(long, env, default_value = DEFAULT_SECRET_NAME)]
    secret_name: String,

    /// Namespace the secret lives in.
    #[arg(long, env, default_value = DEFAULT_SECRET_NAMESPACE)]
    secret_namespace: String,

    /// Upper bound on one hashing-tool invocation, in seconds.
    #[arg(long, env, default_value_t = 10)]
    hash_timeout_secs: u64,

    /// Upper bound on one cluster API call, in seconds.
    #[arg(long, env, default_value_t = 15)]
    api_timeout_secs: u64,
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to connect to the cluster"))]
    InitializeClient {
        source: user_provisioner::client::Error,
    },

    #[snafu(display("failed to run the provisioning API server"))]
    RunServer { source: server::Error },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    initialize_logging();

    let opts = Opts::parse();

    let hasher = Arc::new(HtpasswdCommand::new(&opts.htpasswd_program));
    let store = Arc::new(
        HtpasswdStore::new(&opts.content_root, hasher)
            .with_hash_timeout(Duration::from_secs(opts.hash_timeout_secs)),
    );

    let client = Client::initialize(Some(FIELD_MANAGER.to_owned()))
        .await
        .context(InitializeClientSnafu)?;
    let synchronizer = SecretSynchronizer::new(client, opts.secret_name, opts.secret_namespace)
        .with_api_timeout(Duration::from_secs(opts.api_timeout_secs));

    let provisioner = Arc::new(UserProvisioner::new(store, synchronizer));

    server::run(opts.bind_address, provisioner)
        .await
        .context(RunServerSnafu)
}

/// Log filtering comes from `USER_PROVISIONER_LOG`, INFO when unset.
fn initialize_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
