//! The inbound request layer.
//!
//! One route does the actual work: `POST /api/v1/users` runs the
//! provisioning pipeline for the submitted credentials. Every pipeline error
//! kind maps to a distinct failure response so callers can tell a rejected
//! password from a cluster that refused the secret write.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use htpasswd_store::store;
use serde::{Deserialize, Serialize};
use snafu::{Report, ResultExt, Snafu};
use tokio::signal::unix::{SignalKind, signal};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{provision, provision::UserProvisioner, sync};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to bind listener to {address}"))]
    BindListener {
        source: std::io::Error,
        address: SocketAddr,
    },

    #[snafu(display("failed to register the SIGTERM handler"))]
    RegisterSignalHandler { source: std::io::Error },

    #[snafu(display("failed to serve the provisioning API"))]
    Serve { source: std::io::Error },
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub username: String,
    pub credential_output: String,
    pub sync_status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable failure class, one of `validation`, `credential-tool`, `io`,
    /// `sync`, `timeout` or `follow-up`.
    pub error: &'static str,
    /// Rendered error chain.
    pub message: String,
}

pub fn router(provisioner: Arc<UserProvisioner>) -> Router {
    Router::new()
        .route("/api/v1/users", post(create_user))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(provisioner)
}

/// Serves the provisioning API until SIGTERM or ctrl-c.
pub async fn run(address: SocketAddr, provisioner: Arc<UserProvisioner>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .context(BindListenerSnafu { address })?;
    let mut sigterm = signal(SignalKind::terminate()).context(RegisterSignalHandlerSnafu)?;

    info!(%address, "serving the user provisioning API");
    axum::serve(listener, router(provisioner))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
            }
        })
        .await
        .context(ServeSnafu)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn create_user(
    State(provisioner): State<Arc<UserProvisioner>>,
    Json(request): Json<CreateUserRequest>,
) -> Response {
    match provisioner
        .provision(&request.username, &request.password)
        .await
    {
        Ok(report) => (
            StatusCode::OK,
            Json(CreateUserResponse {
                username: request.username,
                credential_output: report.credential_output,
                sync_status: report.sync_status,
            }),
        )
            .into_response(),
        Err(err) => {
            let (status, kind) = classify(&err);
            let message = Report::from_error(err).to_string();
            error!(user = %request.username, kind, cause = %message, "provisioning failed");

            (
                status,
                Json(ErrorBody {
                    error: kind,
                    message,
                }),
            )
                .into_response()
        }
    }
}

fn classify(error: &provision::Error) -> (StatusCode, &'static str) {
    match error {
        provision::Error::UpsertCredentials { source, .. } => match source {
            store::Error::InvalidUsername { .. } | store::Error::InvalidPassword { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation")
            }
            store::Error::HashTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            store::Error::HashCredentials { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "credential-tool")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "io"),
        },
        provision::Error::SynchronizeSecret { source } => match source {
            sync::Error::OperationTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            sync::Error::ReadCredentialFile { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "io"),
            _ => (StatusCode::BAD_GATEWAY, "sync"),
        },
        provision::Error::RunFollowUp { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "follow-up"),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        path::Path,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use axum::body::Body;
    use htpasswd_store::{
        HtpasswdStore,
        hash::{self, CredentialHasher, HashMode},
    };
    use http::Request;
    use http_body_util::BodyExt;
    use k8s_openapi::api::core::v1::Secret;
    use tower::{ServiceExt, service_fn};

    use super::*;
    use crate::{client::Client, sync::SecretSynchronizer};

    struct FakeHasher;

    #[async_trait]
    impl CredentialHasher for FakeHasher {
        async fn apply(
            &self,
            store_file: &Path,
            username: &str,
            password: &str,
            mode: HashMode,
        ) -> hash::Result<String> {
            let mut lines: Vec<String> = match mode {
                HashMode::Create => Vec::new(),
                HashMode::Update => tokio::fs::read_to_string(store_file)
                    .await
                    .unwrap()
                    .lines()
                    .map(str::to_owned)
                    .collect(),
            };

            let entry = format!("{username}:$2y$05${}", password.chars().rev().collect::<String>());
            match lines
                .iter_mut()
                .find(|line| line.split(':').next() == Some(username))
            {
                Some(line) => *line = entry,
                None => lines.push(entry),
            }

            tokio::fs::write(store_file, lines.join("\n") + "\n")
                .await
                .unwrap();
            Ok(format!("Adding password for user {username}\n"))
        }
    }

    /// A cluster stand-in that accepts the create-or-replace protocol.
    fn mock_cluster_client() -> Client {
        let remote: Arc<Mutex<Option<Secret>>> = Arc::new(Mutex::new(None));

        let service = service_fn(move |request: http::Request<kube::client::Body>| {
            let remote = Arc::clone(&remote);
            async move {
                let (parts, body) = request.into_parts();
                let bytes = body.collect().await.expect("collect request body").to_bytes();

                let mut remote = remote.lock().expect("lock mock state");
                let (status, payload) = match (parts.method.as_str(), parts.uri.path()) {
                    ("GET", "/api/v1/namespaces/openshift-config/secrets/users") => {
                        match remote.as_ref() {
                            Some(secret) => (
                                StatusCode::OK,
                                serde_json::to_value(secret).expect("serialize secret"),
                            ),
                            None => (
                                StatusCode::NOT_FOUND,
                                serde_json::json!({
                                    "kind": "Status",
                                    "apiVersion": "v1",
                                    "metadata": {},
                                    "status": "Failure",
                                    "message": "secrets \"users\" not found",
                                    "reason": "NotFound",
                                    "code": 404
                                }),
                            ),
                        }
                    }
                    ("POST", "/api/v1/namespaces/openshift-config/secrets")
                    | ("PUT", "/api/v1/namespaces/openshift-config/secrets/users") => {
                        let secret: Secret =
                            serde_json::from_slice(&bytes).expect("deserialize secret");
                        *remote = Some(secret.clone());
                        (
                            StatusCode::OK,
                            serde_json::to_value(&secret).expect("serialize secret"),
                        )
                    }
                    other => panic!("unexpected request {other:?}"),
                };

                let response = http::Response::builder()
                    .status(status)
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(kube::client::Body::from(
                        serde_json::to_vec(&payload).expect("serialize payload"),
                    ))
                    .expect("build mock response");
                Ok::<_, Infallible>(response)
            }
        });

        Client::new(
            kube::Client::new(service, "openshift-config"),
            Some("user-provisioner".to_owned()),
        )
    }

    fn test_router(dir: &tempfile::TempDir) -> Router {
        let store = Arc::new(HtpasswdStore::new(dir.path(), Arc::new(FakeHasher)));
        let synchronizer =
            SecretSynchronizer::new(mock_cluster_client(), "users", "openshift-config");
        router(Arc::new(UserProvisioner::new(store, synchronizer)))
    }

    fn user_request(username: &str, password: &str) -> Request<Body> {
        let payload = serde_json::json!({ "username": username, "password": password });
        Request::builder()
            .method("POST")
            .uri("/api/v1/users")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn provisioning_a_user_succeeds_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir);

        let response = app.oneshot(user_request("alice", "pw1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["username"], "alice");
        assert!(
            body["sync_status"]
                .as_str()
                .unwrap()
                .contains("openshift-config")
        );

        let stored = tokio::fs::read_to_string(dir.path().join("users.htpasswd"))
            .await
            .unwrap();
        assert!(stored.starts_with("alice:"));
    }

    #[tokio::test]
    async fn empty_username_is_a_distinct_validation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir);

        let response = app.oneshot(user_request("", "pw1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = body_json(response).await;
        assert_eq!(body["error"], "validation");
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(&dir);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
