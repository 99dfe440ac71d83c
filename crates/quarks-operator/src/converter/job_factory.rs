//! The QuarksJobs a deployment runs before its instance groups can be deployed.
//!
//! `dm-<deployment>` interpolates the generated variables into the manifest. `ig-<deployment>`
//! and `bpm-<deployment>` gather the resolved properties and the BPM information of every
//! instance group. The job runner persists the JSON each container writes as a new version of
//! the secret named in the job's output map.
use std::collections::{BTreeMap, BTreeSet};

use bosh_manifest::{
    Manifest, manifest,
    names::{self, DeploymentSecretType},
    render::env,
};
use k8s_openapi::{
    api::{
        batch::v1::{JobSpec, JobTemplateSpec},
        core::v1::{Container, PodSpec, PodTemplateSpec, VolumeMount},
    },
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference},
};
use snafu::{ResultExt, Snafu};

use crate::{
    builder::{
        meta::ObjectMetaBuilder,
        pod::{
            container::ContainerBuilder,
            volume::{VolumeBuilder, VolumeMountBuilder},
        },
    },
    config::OperatorImage,
    converter::{
        container_factory::spec_copier_container,
        volume_factory::{
            RENDERING_DATA_MOUNT_PATH, RENDERING_DATA_VOLUME, rendering_data_volume_mount,
        },
    },
    crd::{
        LABEL_DEPLOYMENT_NAME, LABEL_DEPLOYMENT_SECRET_TYPE, Output, QuarksJob, QuarksJobSpec,
        SecretOptions, Strategy, Trigger,
    },
};

/// Name of the variable interpolation container, the desired manifest is read from its output.
pub const VARIABLE_INTERPOLATION_CONTAINER: &str = "desired-manifest";

pub const MANIFEST_KEY: &str = "manifest.yaml";
pub const PROPERTIES_KEY: &str = "properties.yaml";
pub const BPM_KEY: &str = "bpm.yaml";

const DEPLOYMENT_MOUNT_PATH: &str = "/var/run/secrets/deployment";
const VARIABLES_MOUNT_PATH: &str = "/var/run/secrets/variables";
const OUTPUT_FILE_PATH: &str = "/mnt/quarks/output.json";

const ENV_VARIABLES_DIR: &str = "VARIABLES_DIR";
const ENV_OUTPUT_FILE_PATH: &str = "OUTPUT_FILE_PATH";
const ENV_NAMESPACE: &str = "NAMESPACE";
const ENV_BASE_DIR: &str = "BASE_DIR";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to generate the {job:?} data gathering job of manifest {manifest:?}"))]
    ReleaseImage {
        source: manifest::Error,
        job: String,
        manifest: String,
    },
}

/// The data a gathering job produces for each instance group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gathering {
    ResolvedProperties,
    Bpm,
}

impl Gathering {
    fn job_name(self, deployment: &str) -> String {
        match self {
            Self::ResolvedProperties => format!("ig-{deployment}"),
            Self::Bpm => format!("bpm-{deployment}"),
        }
    }

    fn command(self) -> &'static str {
        match self {
            Self::ResolvedProperties => "instance-group",
            Self::Bpm => "bpm-configs",
        }
    }

    fn output_key(self) -> &'static str {
        match self {
            Self::ResolvedProperties => PROPERTIES_KEY,
            Self::Bpm => BPM_KEY,
        }
    }

    pub fn secret_type(self) -> DeploymentSecretType {
        match self {
            Self::ResolvedProperties => DeploymentSecretType::InstanceGroupResolvedProperties,
            Self::Bpm => DeploymentSecretType::InstanceGroupBpm,
        }
    }
}

pub struct JobFactory<'a> {
    pub namespace: &'a str,
    pub operator_image: &'a OperatorImage,
    pub owner: Option<&'a OwnerReference>,
}

impl JobFactory<'_> {
    /// The job interpolating the generated variables into the with-ops manifest. Every variable
    /// secret is mounted into its own directory below the variables directory.
    pub fn variable_interpolation_job(&self, manifest: &Manifest) -> QuarksJob {
        let deployment = manifest.name.as_str();
        let with_ops_volume = DeploymentSecretType::ManifestWithOps.to_string();
        let with_ops =
            names::calculate_secret_name(DeploymentSecretType::ManifestWithOps, deployment, "");

        let mut volumes = vec![
            VolumeBuilder::new(&with_ops_volume)
                .with_secret(with_ops, false)
                .build(),
        ];
        let mut mounts = vec![
            VolumeMountBuilder::new(with_ops_volume, DEPLOYMENT_MOUNT_PATH)
                .read_only(true)
                .build(),
        ];

        for variable in &manifest.variables {
            let volume_name = names::sanitize(&format!("var-{}", variable.name));
            let secret_name = names::implicit_variable_secret_name(deployment, &variable.name);
            let mount_path = format!("{VARIABLES_MOUNT_PATH}/{}", variable.name);
            volumes.push(
                VolumeBuilder::new(&volume_name)
                    .with_secret(secret_name, false)
                    .build(),
            );
            mounts.push(
                VolumeMountBuilder::new(volume_name, mount_path)
                    .read_only(true)
                    .build(),
            );
        }

        if manifest.variables.is_empty() {
            volumes.push(VolumeBuilder::new("no-vars").build());
            mounts.push(VolumeMountBuilder::new("no-vars", VARIABLES_MOUNT_PATH).build());
        }

        let container = self
            .operator_container(VARIABLE_INTERPOLATION_CONTAINER, "variable-interpolation")
            .add_volume_mounts(mounts)
            .add_env_var(env::BOSH_MANIFEST_PATH, manifest_path())
            .add_env_var(ENV_VARIABLES_DIR, VARIABLES_MOUNT_PATH)
            .add_env_var(ENV_OUTPUT_FILE_PATH, OUTPUT_FILE_PATH)
            .build();

        let output_map = [(
            VARIABLE_INTERPOLATION_CONTAINER.to_owned(),
            [(
                MANIFEST_KEY.to_owned(),
                SecretOptions {
                    name: names::desired_manifest_prefix(deployment),
                    versioned: true,
                },
            )]
            .into(),
        )]
        .into();

        self.quarks_job(
            &format!("dm-{deployment}"),
            deployment,
            DeploymentSecretType::DesiredManifest,
            output_map,
            PodSpec {
                containers: vec![container],
                volumes: Some(volumes),
                ..PodSpec::default()
            },
        )
    }

    /// A data gathering job with one container per instance group that has instances. The job
    /// specs of every release are copied into the rendering volume first.
    pub fn gathering_job(&self, manifest: &Manifest, gathering: Gathering) -> Result<QuarksJob> {
        let deployment = manifest.name.as_str();
        let job_name = gathering.job_name(deployment);
        // The job runner mounts the latest version of a versioned secret.
        let desired_manifest =
            names::versioned_secret_name(&names::desired_manifest_prefix(deployment), "1");

        let instance_groups = manifest.instance_groups.iter().filter(|ig| ig.instances != 0);

        let mut init_containers = Vec::new();
        let mut copied_releases = BTreeSet::new();
        let mut containers = Vec::new();
        let mut output_map = BTreeMap::new();

        for ig in instance_groups {
            for job in &ig.jobs {
                if !copied_releases.insert(job.release.as_str()) {
                    continue;
                }
                let image = manifest
                    .release_image(&ig.name, &job.name)
                    .context(ReleaseImageSnafu {
                        job: &job_name,
                        manifest: deployment,
                    })?;
                init_containers.push(spec_copier_container(&job.release, &image));
            }

            let container_name = names::sanitize(&ig.name);
            containers.push(self.gathering_container(&container_name, &ig.name, gathering));
            output_map.insert(
                container_name,
                [(
                    gathering.output_key().to_owned(),
                    SecretOptions {
                        name: names::instance_group_secret_prefix(
                            gathering.secret_type(),
                            deployment,
                            &ig.name,
                        ),
                        versioned: true,
                    },
                )]
                .into(),
            );
        }

        Ok(self.quarks_job(
            &job_name,
            deployment,
            gathering.secret_type(),
            output_map,
            PodSpec {
                init_containers: Some(init_containers),
                containers,
                volumes: Some(vec![
                    VolumeBuilder::new(DeploymentSecretType::DesiredManifest.to_string())
                        .with_secret(desired_manifest, false)
                        .build(),
                    VolumeBuilder::new(RENDERING_DATA_VOLUME).build(),
                ]),
                ..PodSpec::default()
            },
        ))
    }

    fn gathering_container(
        &self,
        name: &str,
        instance_group: &str,
        gathering: Gathering,
    ) -> Container {
        self.operator_container(name, gathering.command())
            .add_volume_mounts([desired_manifest_mount(), rendering_data_volume_mount()])
            .add_env_var(env::BOSH_MANIFEST_PATH, manifest_path())
            .add_env_var(ENV_NAMESPACE, self.namespace)
            .add_env_var(ENV_BASE_DIR, RENDERING_DATA_MOUNT_PATH)
            .add_env_var(env::INSTANCE_GROUP_NAME, instance_group)
            .add_env_var(ENV_OUTPUT_FILE_PATH, OUTPUT_FILE_PATH)
            .build()
    }

    fn operator_container(&self, name: &str, util_command: &str) -> ContainerBuilder {
        let mut builder = ContainerBuilder::new(name);
        builder
            .image(&self.operator_image.image)
            .image_pull_policy(&self.operator_image.pull_policy)
            .command(vec!["quarks-operator".to_owned()])
            .args(vec!["util".to_owned(), util_command.to_owned()]);
        builder
    }

    fn object_meta(&self, name: &str, deployment: &str) -> ObjectMeta {
        ObjectMetaBuilder::for_deployment(name, self.namespace, deployment)
            .owner(self.owner)
            .build()
    }

    fn quarks_job(
        &self,
        name: &str,
        deployment: &str,
        secret_type: DeploymentSecretType,
        output_map: BTreeMap<String, BTreeMap<String, SecretOptions>>,
        pod_spec: PodSpec,
    ) -> QuarksJob {
        let spec = QuarksJobSpec {
            trigger: Trigger {
                strategy: Strategy::Once,
            },
            template: JobTemplateSpec {
                spec: Some(JobSpec {
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            name: Some(name.to_owned()),
                            labels: Some([("delete".to_owned(), "pod".to_owned())].into()),
                            ..ObjectMeta::default()
                        }),
                        spec: Some(PodSpec {
                            restart_policy: Some("OnFailure".to_owned()),
                            ..pod_spec
                        }),
                    },
                    ..JobSpec::default()
                }),
                ..JobTemplateSpec::default()
            },
            output: Some(Output {
                output_map,
                output_type: "json".to_owned(),
                secret_labels: [
                    (LABEL_DEPLOYMENT_NAME.to_owned(), deployment.to_owned()),
                    (LABEL_DEPLOYMENT_SECRET_TYPE.to_owned(), secret_type.to_string()),
                ]
                .into(),
            }),
            update_on_config_change: true,
        };

        QuarksJob {
            metadata: self.object_meta(name, deployment),
            spec,
        }
    }
}

fn desired_manifest_mount() -> VolumeMount {
    VolumeMountBuilder::new(
        DeploymentSecretType::DesiredManifest.to_string(),
        DEPLOYMENT_MOUNT_PATH,
    )
    .read_only(true)
    .build()
}

fn manifest_path() -> String {
    format!("{DEPLOYMENT_MOUNT_PATH}/{MANIFEST_KEY}")
}
