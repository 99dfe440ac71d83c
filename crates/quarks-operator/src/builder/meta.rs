//! Metadata of the objects the operator writes for a BOSH deployment.
use std::collections::BTreeMap;

use bosh_manifest::names::DeploymentSecretType;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::crd::{LABEL_DEPLOYMENT_NAME, LABEL_DEPLOYMENT_SECRET_TYPE, LABEL_INSTANCE_GROUP_NAME};

/// Builds the [`ObjectMeta`] of generated objects.
///
/// Objects generated for a deployment carry its name as a label. When the owning
/// BOSHDeployment is known it becomes the single controller owner, so the objects are garbage
/// collected with it.
#[derive(Clone, Debug, Default)]
pub struct ObjectMetaBuilder {
    name: Option<String>,
    namespace: Option<String>,
    owner: Option<OwnerReference>,
    labels: BTreeMap<String, String>,
}

impl ObjectMetaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata of the object `name` in `namespace`, generated for `deployment`.
    pub fn for_deployment(
        name: impl Into<String>,
        namespace: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        let mut builder = Self::new();
        builder
            .name(name)
            .namespace(namespace)
            .with_label(LABEL_DEPLOYMENT_NAME, deployment);
        builder
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn namespace(&mut self, namespace: impl Into<String>) -> &mut Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn owner(&mut self, owner: Option<&OwnerReference>) -> &mut Self {
        self.owner = owner.cloned();
        self
    }

    pub fn instance_group(&mut self, instance_group: impl Into<String>) -> &mut Self {
        self.with_label(LABEL_INSTANCE_GROUP_NAME, instance_group)
    }

    /// Marks secrets the controllers look up by type, like the BPM information.
    pub fn secret_type(&mut self, secret_type: DeploymentSecretType) -> &mut Self {
        self.with_label(LABEL_DEPLOYMENT_SECRET_TYPE, secret_type.to_string())
    }

    /// Overrides a label with the same key.
    pub fn with_label(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_labels(&mut self, labels: BTreeMap<String, String>) -> &mut Self {
        self.labels.extend(labels);
        self
    }

    pub fn build(&self) -> ObjectMeta {
        ObjectMeta {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            owner_references: self.owner.clone().map(|owner| vec![owner]),
            labels: (!self.labels.is_empty()).then(|| self.labels.clone()),
            ..ObjectMeta::default()
        }
    }
}
