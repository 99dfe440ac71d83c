//! Access to the cluster for the reconcilers.
//!
//! [`Client`] wraps a [`kube::Client`] and provides the few write patterns the reconcilers need:
//! create-or-update with a mutate function, merge patches of annotations and status and the
//! lookup of the latest version of a versioned secret. The reconcilers only see the
//! [`Cluster`] and [`VersionedSecretStore`] capabilities so that they can be tested without an
//! API server.
use std::{collections::BTreeMap, fmt::Debug};

use async_trait::async_trait;
use k8s_openapi::{
    NamespaceResourceScope,
    api::core::v1::{Secret, Service},
};
use kube::{
    Api, Resource, ResourceExt,
    api::{ListParams, Patch, PatchParams, PostParams},
};
#[cfg(test)]
use mockall::automock;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::debug;

use crate::crd::{
    BoshDeployment, LABEL_SECRET_KIND, LABEL_SECRET_VERSION, QuarksJob, QuarksSecret,
    QuarksStatefulSet, SECRET_KIND_VERSIONED,
};

pub mod mutate;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("object has no name"))]
    MissingObjectName,

    #[snafu(display("object {name:?} has no namespace"))]
    MissingObjectNamespace { name: String },

    #[snafu(display("failed to get {kind} {name:?}"))]
    GetObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to create {kind} {name:?}"))]
    CreateObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to update {kind} {name:?}"))]
    UpdateObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to patch {kind} {name:?}"))]
    PatchObject {
        source: kube::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to list {kind} in namespace {namespace:?}"))]
    ListObjects {
        source: kube::Error,
        kind: String,
        namespace: String,
    },
}

/// What a create-or-update did to the object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Created,
    Updated,
    Unchanged,
}

/// Writes of the reconcilers. Every `apply_*` is an idempotent create-or-update keyed by the
/// object name.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn apply_secret(&self, secret: Secret) -> Result<Operation>;

    async fn apply_quarks_secret(&self, quarks_secret: QuarksSecret) -> Result<Operation>;

    async fn apply_quarks_job(&self, quarks_job: QuarksJob) -> Result<Operation>;

    async fn apply_quarks_stateful_set(&self, quarks_sts: QuarksStatefulSet) -> Result<Operation>;

    async fn apply_service(&self, service: Service) -> Result<Operation>;

    async fn get_deployment(&self, namespace: &str, name: &str)
    -> Result<Option<BoshDeployment>>;

    async fn quarks_stateful_set_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Merges `annotations` into the annotations of the deployment.
    async fn annotate_deployment(
        &self,
        deployment: &BoshDeployment,
        annotations: BTreeMap<String, String>,
    ) -> Result<()>;

    async fn update_deployment_state(&self, deployment: &BoshDeployment, state: &str)
    -> Result<()>;

    /// Merges `annotations` into the annotations of the secret.
    async fn annotate_secret(
        &self,
        secret: &Secret,
        annotations: BTreeMap<String, String>,
    ) -> Result<()>;
}

/// Read side of the versioned secret convention: secrets named `<prefix>-v<N>` and labelled with
/// their version.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VersionedSecretStore: Send + Sync {
    /// The secret with the highest version, [`None`] if there is no version yet.
    async fn latest(&self, namespace: &str, prefix: &str) -> Result<Option<Secret>>;
}

/// This `Client` can be used to access Kubernetes.
/// It wraps an underlying [`kube::Client`] and provides some common functionality.
#[derive(Clone)]
pub struct Client {
    client: kube::Client,
    post_params: PostParams,
    merge_patch_params: PatchParams,
}

impl Client {
    pub fn new(client: kube::Client, field_manager: Option<String>) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager: field_manager.clone(),
                ..PostParams::default()
            },
            merge_patch_params: PatchParams {
                field_manager,
                ..PatchParams::default()
            },
        }
    }

    /// Returns a [`kube::Client`] that can be freely used.
    pub fn get_namespaced_api<T>(&self, namespace: &str) -> Api<T>
    where
        T: Resource<Scope = NamespaceResourceScope>,
        T::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Retrieves a single object, [`None`] if it does not exist.
    pub async fn get_opt<T>(&self, name: &str, namespace: &str) -> Result<Option<T>>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        T::DynamicType: Default,
    {
        self.get_namespaced_api::<T>(namespace)
            .get_opt(name)
            .await
            .context(GetObjectSnafu {
                kind: T::kind(&T::DynamicType::default()),
                name,
            })
    }

    /// Creates `desired` if it does not exist. Otherwise `mutate` merges the fields owned by the
    /// operator from `desired` into the current object, which is only written if that changed
    /// anything.
    pub async fn create_or_update<T>(
        &self,
        desired: T,
        mutate: impl FnOnce(&mut T, &T),
    ) -> Result<Operation>
    where
        T: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug
            + PartialEq,
        T::DynamicType: Default,
    {
        let kind = T::kind(&T::DynamicType::default()).into_owned();
        let name = desired.meta().name.clone().context(MissingObjectNameSnafu)?;
        let namespace = desired
            .namespace()
            .context(MissingObjectNamespaceSnafu { name: &name })?;
        let api = self.get_namespaced_api::<T>(&namespace);

        let Some(current) = api.get_opt(&name).await.context(GetObjectSnafu {
            kind: &kind,
            name: &name,
        })?
        else {
            api.create(&self.post_params, &desired)
                .await
                .context(CreateObjectSnafu {
                    kind: &kind,
                    name: &name,
                })?;
            debug!(%kind, %name, %namespace, "created object");
            return Ok(Operation::Created);
        };

        let mut updated = current.clone();
        mutate(&mut updated, &desired);
        if updated == current {
            return Ok(Operation::Unchanged);
        }

        api.replace(&name, &self.post_params, &updated)
            .await
            .context(UpdateObjectSnafu {
                kind: &kind,
                name: &name,
            })?;
        debug!(%kind, %name, %namespace, "updated object");
        Ok(Operation::Updated)
    }

    /// Patches a resource using the `MERGE` patch strategy.
    /// This will fail for objects that do not exist yet.
    pub async fn merge_patch<T>(&self, resource: &T, patch: serde_json::Value) -> Result<T>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        T::DynamicType: Default,
    {
        let (name, namespace) = name_and_namespace(resource)?;
        self.get_namespaced_api::<T>(&namespace)
            .patch(&name, &self.merge_patch_params, &Patch::Merge(patch))
            .await
            .context(PatchObjectSnafu {
                kind: T::kind(&T::DynamicType::default()),
                name,
            })
    }

    /// Merges `status` into the status subresource.
    pub async fn merge_patch_status<T, S>(&self, resource: &T, status: &S) -> Result<T>
    where
        T: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        T::DynamicType: Default,
        S: Serialize,
    {
        let (name, namespace) = name_and_namespace(resource)?;
        self.get_namespaced_api::<T>(&namespace)
            .patch_status(
                &name,
                &self.merge_patch_params,
                &Patch::Merge(json!({ "status": status })),
            )
            .await
            .context(PatchObjectSnafu {
                kind: T::kind(&T::DynamicType::default()),
                name,
            })
    }
}

fn name_and_namespace<T: Resource>(resource: &T) -> Result<(String, String)> {
    let name = resource.meta().name.clone().context(MissingObjectNameSnafu)?;
    let namespace = resource
        .meta()
        .namespace
        .clone()
        .context(MissingObjectNamespaceSnafu { name: &name })?;
    Ok((name, namespace))
}

#[async_trait]
impl Cluster for Client {
    async fn apply_secret(&self, secret: Secret) -> Result<Operation> {
        self.create_or_update(secret, mutate::secret).await
    }

    async fn apply_quarks_secret(&self, quarks_secret: QuarksSecret) -> Result<Operation> {
        self.create_or_update(quarks_secret, mutate::quarks_secret)
            .await
    }

    async fn apply_quarks_job(&self, quarks_job: QuarksJob) -> Result<Operation> {
        self.create_or_update(quarks_job, mutate::quarks_job).await
    }

    async fn apply_quarks_stateful_set(&self, quarks_sts: QuarksStatefulSet) -> Result<Operation> {
        self.create_or_update(quarks_sts, mutate::quarks_stateful_set)
            .await
    }

    async fn apply_service(&self, service: Service) -> Result<Operation> {
        self.create_or_update(service, mutate::service).await
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BoshDeployment>> {
        self.get_opt(name, namespace).await
    }

    async fn quarks_stateful_set_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        self.get_opt::<QuarksStatefulSet>(name, namespace)
            .await
            .map(|quarks_sts| quarks_sts.is_some())
    }

    async fn annotate_deployment(
        &self,
        deployment: &BoshDeployment,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        self.merge_patch(deployment, annotations_patch(annotations))
            .await
            .map(drop)
    }

    async fn update_deployment_state(
        &self,
        deployment: &BoshDeployment,
        state: &str,
    ) -> Result<()> {
        self.merge_patch_status(deployment, &json!({ "state": state }))
            .await
            .map(drop)
    }

    async fn annotate_secret(
        &self,
        secret: &Secret,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        self.merge_patch(secret, annotations_patch(annotations))
            .await
            .map(drop)
    }
}

fn annotations_patch(annotations: BTreeMap<String, String>) -> serde_json::Value {
    json!({ "metadata": { "annotations": annotations } })
}

#[async_trait]
impl VersionedSecretStore for Client {
    async fn latest(&self, namespace: &str, prefix: &str) -> Result<Option<Secret>> {
        let secrets = self
            .get_namespaced_api::<Secret>(namespace)
            .list(&ListParams::default().labels(&format!(
                "{LABEL_SECRET_KIND}={SECRET_KIND_VERSIONED}"
            )))
            .await
            .context(ListObjectsSnafu {
                kind: "Secret",
                namespace,
            })?;
        Ok(latest_version(secrets.items, prefix))
    }
}

/// The version of a versioned secret named `<prefix>-v<N>`, taken from its version label.
pub fn secret_version(secret: &Secret, prefix: &str) -> Option<u64> {
    let suffix = secret
        .metadata
        .name
        .as_deref()?
        .strip_prefix(prefix)?
        .strip_prefix("-v")?;
    let version = secret.labels().get(LABEL_SECRET_VERSION)?;
    if suffix != version.as_str() {
        return None;
    }
    version.parse().ok()
}

fn latest_version(secrets: impl IntoIterator<Item = Secret>, prefix: &str) -> Option<Secret> {
    secrets
        .into_iter()
        .filter_map(|secret| secret_version(&secret, prefix).map(|version| (version, secret)))
        .max_by_key(|(version, _)| *version)
        .map(|(_, secret)| secret)
}
