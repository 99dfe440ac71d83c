//! The reconcilers.
//!
//! [`deployment`] drives a [`BoshDeployment`] through its phases, [`bpm_secret`] redeploys an
//! instance group whenever a new version of its BPM information is written. Both deploy instance
//! groups with [`deploy_instance_group`].
use std::{string::FromUtf8Error, sync::Arc, time::Duration};

use bosh_manifest::{
    Manifest,
    bpm::{self, BpmInfo},
    manifest::{self, InstanceGroup},
    names::{self, DeploymentSecretType},
};
use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt, runtime::reflector::ObjectRef};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{debug, info};

use crate::{
    client::{self, Cluster, VersionedSecretStore},
    config::OperatorConfig,
    converter::{
        job_factory::{BPM_KEY, MANIFEST_KEY},
        kube_converter::{self, KubeConverter},
    },
    crd::{BoshDeployment, LABEL_SECRET_VERSION},
    resolver::ManifestResolver,
};

pub mod bpm_secret;
pub mod deployment;
mod meltdown;
mod state;

pub use state::DeploymentState;

/// How long to wait for outputs of other controllers, like the secrets written by jobs.
pub const DEPENDENCY_REQUEUE_AFTER: Duration = Duration::from_secs(5);

/// Shared by all reconcile runs of a controller.
pub struct Context {
    pub cluster: Arc<dyn Cluster>,
    pub secrets: Arc<dyn VersionedSecretStore>,
    pub resolver: Arc<dyn ManifestResolver>,
    pub config: OperatorConfig,
}

type Result<T, E = DeployError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum DeployError {
    #[snafu(display("deployment {deployment:?} has no uid to own its workloads"))]
    MissingOwnerReference { deployment: String },

    #[snafu(display("failed to read the latest version of {prefix:?}"))]
    ReadVersionedSecret {
        source: client::Error,
        prefix: String,
    },

    #[snafu(display("{secret} has no version label"))]
    MissingSecretVersion { secret: ObjectRef<Secret> },

    #[snafu(display("{secret} doesn't contain key {key}"))]
    MissingSecretKey {
        secret: ObjectRef<Secret>,
        key: &'static str,
    },

    #[snafu(display("{secret} is not valid UTF-8"))]
    InvalidSecretData {
        source: FromUtf8Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to parse the BPM information in {secret}"))]
    ParseBpmInfo {
        source: bpm::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to parse the desired manifest in {secret}"))]
    ParseDesiredManifest {
        source: manifest::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to look up the QuarksStatefulSet {name:?}"))]
    GetQuarksStatefulSet { source: client::Error, name: String },

    #[snafu(display("failed to convert instance group {instance_group:?}"))]
    ConvertInstanceGroup {
        source: kube_converter::Error,
        instance_group: String,
    },

    #[snafu(display("failed to apply {kind} {name:?}"))]
    Apply {
        source: client::Error,
        kind: &'static str,
        name: String,
    },
}

impl DeployError {
    /// The secret the error was found in, if any.
    pub fn secret(&self) -> Option<&ObjectRef<Secret>> {
        match self {
            Self::MissingSecretVersion { secret }
            | Self::MissingSecretKey { secret, .. }
            | Self::InvalidSecretData { secret, .. }
            | Self::ParseBpmInfo { secret, .. }
            | Self::ParseDesiredManifest { secret, .. } => Some(secret),
            Self::MissingOwnerReference { .. }
            | Self::ReadVersionedSecret { .. }
            | Self::GetQuarksStatefulSet { .. }
            | Self::ConvertInstanceGroup { .. }
            | Self::Apply { .. } => None,
        }
    }
}

fn secret_ref(secret: &Secret) -> ObjectRef<Secret> {
    let object_ref = ObjectRef::new(&secret.name_any());
    match secret.namespace() {
        Some(namespace) => object_ref.within(&namespace),
        None => object_ref,
    }
}

/// The value of `key` in the data of `secret`.
pub(crate) fn secret_value(secret: &Secret, key: &'static str) -> Result<String> {
    let value = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .context(MissingSecretKeySnafu {
            secret: secret_ref(secret),
            key,
        })?;
    String::from_utf8(value.0.clone()).context(InvalidSecretDataSnafu {
        secret: secret_ref(secret),
    })
}

pub(crate) fn secret_version(secret: &Secret) -> Result<String> {
    secret
        .labels()
        .get(LABEL_SECRET_VERSION)
        .cloned()
        .context(MissingSecretVersionSnafu {
            secret: secret_ref(secret),
        })
}

pub(crate) fn bpm_info(secret: &Secret) -> Result<BpmInfo> {
    BpmInfo::from_yaml(&secret_value(secret, BPM_KEY)?).context(ParseBpmInfoSnafu {
        secret: secret_ref(secret),
    })
}

async fn latest(ctx: &Context, namespace: &str, prefix: &str) -> Result<Option<Secret>> {
    ctx.secrets
        .latest(namespace, prefix)
        .await
        .context(ReadVersionedSecretSnafu { prefix })
}

/// The latest desired manifest of `deployment`, [`None`] until the variable interpolation job
/// wrote it.
pub(crate) async fn desired_manifest(
    ctx: &Context,
    namespace: &str,
    deployment: &str,
) -> Result<Option<Manifest>> {
    let Some(secret) = latest(ctx, namespace, &names::desired_manifest_prefix(deployment)).await?
    else {
        return Ok(None);
    };
    let manifest = Manifest::from_yaml(&secret_value(&secret, MANIFEST_KEY)?).context(
        ParseDesiredManifestSnafu {
            secret: secret_ref(&secret),
        },
    )?;
    Ok(Some(manifest))
}

/// The latest version of an output secret of the data gathering jobs for `instance_group`.
pub(crate) async fn gathered_secret(
    ctx: &Context,
    namespace: &str,
    deployment: &str,
    secret_type: DeploymentSecretType,
    instance_group: &str,
) -> Result<Option<Secret>> {
    let prefix = names::instance_group_secret_prefix(secret_type, deployment, instance_group);
    latest(ctx, namespace, &prefix).await
}

/// Converts `instance_group` and creates or updates its QuarksJobs, Services and
/// QuarksStatefulSets, all owned by `deployment`.
pub(crate) async fn deploy_instance_group(
    ctx: &Context,
    deployment: &BoshDeployment,
    namespace: &str,
    manifest: &Manifest,
    instance_group: &InstanceGroup,
    bpm_configs: &bpm::Configs,
    resolved_secret_version: &str,
) -> Result<()> {
    let owner = deployment
        .controller_owner_ref(&())
        .context(MissingOwnerReferenceSnafu {
            deployment: deployment.name_any(),
        })?;

    let quarks_sts_name = names::sanitize(&instance_group.name);
    let initial_rollout = !ctx
        .cluster
        .quarks_stateful_set_exists(namespace, &quarks_sts_name)
        .await
        .context(GetQuarksStatefulSetSnafu {
            name: &quarks_sts_name,
        })?;

    let resources = KubeConverter {
        namespace,
        operator_image: &ctx.config.operator_image,
        owner: Some(&owner),
    }
    .bpm_resources(
        manifest,
        instance_group,
        bpm_configs,
        resolved_secret_version,
        initial_rollout,
    )
    .context(ConvertInstanceGroupSnafu {
        instance_group: &instance_group.name,
    })?;

    for errand in resources.errands {
        let name = errand.name_any();
        let operation = ctx.cluster.apply_quarks_job(errand).await.context(ApplySnafu {
            kind: "QuarksJob",
            name: &name,
        })?;
        debug!(%name, %operation, "applied errand");
    }
    for service in resources.services {
        let name = service.name_any();
        let operation = ctx.cluster.apply_service(service).await.context(ApplySnafu {
            kind: "Service",
            name: &name,
        })?;
        debug!(%name, %operation, "applied service");
    }
    for quarks_sts in resources.instance_groups {
        let name = quarks_sts.name_any();
        let operation = ctx
            .cluster
            .apply_quarks_stateful_set(quarks_sts)
            .await
            .context(ApplySnafu {
                kind: "QuarksStatefulSet",
                name: &name,
            })?;
        debug!(%name, %operation, "applied QuarksStatefulSet");
    }

    info!(
        instance_group = %instance_group.name,
        resolved_secret_version,
        initial_rollout,
        "deployed instance group"
    );
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use bosh_manifest::bpm::{BpmInfo, Config, Process};
    use indoc::indoc;
    use k8s_openapi::{ByteString, apimachinery::pkg::apis::meta::v1::ObjectMeta};

    use super::*;
    use crate::{
        client::{MockCluster, MockVersionedSecretStore},
        crd::{
            ANNOTATION_MANIFEST_SHA1, BoshDeploymentSpec, BoshDeploymentStatus, LABEL_SECRET_KIND,
            ResourceReference, SECRET_KIND_VERSIONED,
        },
        resolver::MockManifestResolver,
    };

    pub const NATS: &str = indoc! {"
        name: nats-deployment
        releases:
        - name: nats
          version: 26
          url: docker.io/cfcontainerization
          stemcell: {os: opensuse-42.3, version: 36.g03b4653-30.80-7.0.0_316.gcf9fe4a7}
        instance_groups:
        - name: nats
          instances: 2
          jobs:
          - name: nats
            release: nats
            properties:
              quarks:
                ports:
                - {name: nats, protocol: TCP, internal: 4222}
        variables:
        - name: nats_password
          type: password
    "};

    pub fn nats_manifest() -> Manifest {
        Manifest::from_yaml(NATS).expect("manifest must parse")
    }

    pub fn deployment(state: Option<&str>, sha1: Option<&str>) -> BoshDeployment {
        let mut deployment = BoshDeployment::new(
            "nats-deployment",
            BoshDeploymentSpec {
                manifest: ResourceReference {
                    name: "nats-manifest".to_owned(),
                    type_: "configmap".to_owned(),
                },
                ops: Vec::new(),
            },
        );
        deployment.metadata.namespace = Some("default".to_owned());
        deployment.metadata.uid = Some("3a0c3c6e".to_owned());
        deployment.metadata.annotations =
            sha1.map(|sha1| [(ANNOTATION_MANIFEST_SHA1.to_owned(), sha1.to_owned())].into());
        deployment.status = state.map(|state| BoshDeploymentStatus {
            state: Some(state.to_owned()),
        });
        deployment
    }

    pub fn versioned_secret(
        name: &str,
        version: u64,
        labels: &[(&str, &str)],
        data: &[(&str, String)],
    ) -> Secret {
        let mut all_labels: BTreeMap<String, String> = labels
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        all_labels.insert(LABEL_SECRET_KIND.to_owned(), SECRET_KIND_VERSIONED.to_owned());
        all_labels.insert(LABEL_SECRET_VERSION.to_owned(), version.to_string());

        Secret {
            metadata: ObjectMeta {
                name: Some(names::versioned_secret_name(name, &version.to_string())),
                namespace: Some("default".to_owned()),
                labels: Some(all_labels),
                ..ObjectMeta::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_owned(), ByteString(v.clone().into_bytes())))
                    .collect(),
            ),
            ..Secret::default()
        }
    }

    pub fn nats_bpm_info() -> BpmInfo {
        BpmInfo {
            configs: [(
                "nats".to_owned(),
                Config {
                    processes: vec![Process {
                        name: "nats".to_owned(),
                        executable: "/bin/nats-server".to_owned(),
                        ..Process::default()
                    }],
                    ..Config::default()
                },
            )]
            .into(),
            ..BpmInfo::default()
        }
    }

    pub fn bpm_secret(labels: &[(&str, &str)]) -> Secret {
        let info = nats_bpm_info().to_yaml().expect("BPM info serializes");
        versioned_secret("nats-deployment.bpm.nats", 1, labels, &[("bpm.yaml", info)])
    }

    pub fn resolved_properties_secret() -> Secret {
        versioned_secret(
            "nats-deployment.ig-resolved.nats",
            2,
            &[],
            &[("properties.yaml", NATS.to_owned())],
        )
    }

    pub fn desired_manifest_secret() -> Secret {
        versioned_secret(
            "nats-deployment.desired-manifest",
            1,
            &[],
            &[("manifest.yaml", NATS.to_owned())],
        )
    }

    pub fn context(
        cluster: MockCluster,
        secrets: MockVersionedSecretStore,
        resolver: MockManifestResolver,
    ) -> Arc<Context> {
        Arc::new(Context {
            cluster: Arc::new(cluster),
            secrets: Arc::new(secrets),
            resolver: Arc::new(resolver),
            config: OperatorConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::{test_support::*, *};
    use crate::{
        client::{MockCluster, MockVersionedSecretStore, Operation},
        resolver::MockManifestResolver,
    };

    #[tokio::test]
    async fn deploys_the_workloads_of_an_instance_group() {
        let mut cluster = MockCluster::new();
        cluster
            .expect_quarks_stateful_set_exists()
            .with(eq("default"), eq("nats"))
            .returning(|_, _| Ok(false));
        cluster
            .expect_apply_service()
            .withf(|service| service.name_any() == "nats-deployment-nats")
            .times(1)
            .returning(|_| Ok(Operation::Created));
        cluster
            .expect_apply_quarks_stateful_set()
            .withf(|quarks_sts| {
                quarks_sts.name_any() == "nats"
                    && quarks_sts.owner_references()[0].uid == "3a0c3c6e"
            })
            .times(1)
            .returning(|_| Ok(Operation::Created));
        cluster.expect_apply_quarks_job().never();

        let ctx = context(
            cluster,
            MockVersionedSecretStore::new(),
            MockManifestResolver::new(),
        );
        let manifest = nats_manifest();
        deploy_instance_group(
            &ctx,
            &deployment(Some("DataGathered"), None),
            "default",
            &manifest,
            &manifest.instance_groups[0],
            &nats_bpm_info().configs,
            "2",
        )
        .await
        .expect("instance group deploys");
    }

    #[tokio::test]
    async fn deploying_needs_an_owner() {
        let ctx = context(
            MockCluster::new(),
            MockVersionedSecretStore::new(),
            MockManifestResolver::new(),
        );
        let mut deployment = deployment(None, None);
        deployment.metadata.uid = None;
        let manifest = nats_manifest();

        let result = deploy_instance_group(
            &ctx,
            &deployment,
            "default",
            &manifest,
            &manifest.instance_groups[0],
            &nats_bpm_info().configs,
            "1",
        )
        .await;
        assert!(matches!(result, Err(DeployError::MissingOwnerReference { .. })));
    }

    #[test]
    fn reads_secret_values() {
        let secret = bpm_secret(&[]);
        assert_eq!(secret_version(&secret).expect("version is set"), "1");
        let info = bpm_info(&secret).expect("BPM info parses");
        assert_eq!(info.configs["nats"].processes[0].executable, "/bin/nats-server");

        let error = secret_value(&secret, "properties.yaml").expect_err("key is missing");
        let message = error.to_string();
        assert!(message.contains("nats-deployment.bpm.nats-v1"));
        assert!(message.ends_with("doesn't contain key properties.yaml"));
        assert!(error.secret().is_some());
    }
}
