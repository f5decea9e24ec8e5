//! A thin wrapper around [`kube::Client`] providing the handful of typed
//! operations the synchronizer needs.

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Resource, api::PostParams};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu};
use tracing::info;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to infer cluster configuration from the environment"))]
    InferConfiguration { source: kube::Error },
}

/// Wraps an underlying [`kube::Client`] together with the write parameters
/// used for every create and replace issued by this service.
#[derive(Clone)]
pub struct Client {
    client: kube::Client,
    post_params: PostParams,
}

impl Client {
    pub fn new(client: kube::Client, field_manager: Option<String>) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager,
                ..PostParams::default()
            },
        }
    }

    /// Connects using the hosting environment: in-cluster service-account
    /// credentials when running in a pod, the local kubeconfig otherwise.
    pub async fn initialize(field_manager: Option<String>) -> Result<Self> {
        let client = kube::Client::try_default()
            .await
            .context(InferConfigurationSnafu)?;
        info!(
            default_namespace = %client.default_namespace(),
            "connected to the cluster API"
        );

        Ok(Self::new(client, field_manager))
    }

    /// Returns a namespaced [`kube::Api`] for the requested resource type.
    pub fn get_namespaced_api<T>(&self, namespace: &str) -> Api<T>
    where
        T: Resource<Scope = NamespaceResourceScope>,
        T::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Retrieves a single resource with a tagged presence result:
    /// `Ok(Some(_))` when found, `Ok(None)` when the API server answered 404
    /// for this name, `Err(_)` for everything else. Absence is never inferred
    /// from anything other than a genuine not-found answer.
    pub async fn get_opt<T>(&self, name: &str, namespace: &str) -> kube::Result<Option<T>>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        T::DynamicType: Default,
    {
        self.get_namespaced_api(namespace).get_opt(name).await
    }

    /// Creates a new resource in `namespace`.
    pub async fn create<T>(&self, resource: &T, namespace: &str) -> kube::Result<T>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        T::DynamicType: Default,
    {
        self.get_namespaced_api(namespace)
            .create(&self.post_params, resource)
            .await
    }

    /// Replaces the existing resource `name` in `namespace` wholesale.
    ///
    /// The submitted object must carry the `resourceVersion` of the revision
    /// it is based on; the API server rejects the write otherwise.
    pub async fn replace<T>(&self, resource: &T, name: &str, namespace: &str) -> kube::Result<T>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        T::DynamicType: Default,
    {
        self.get_namespaced_api(namespace)
            .replace(name, &self.post_params, resource)
            .await
    }
}
