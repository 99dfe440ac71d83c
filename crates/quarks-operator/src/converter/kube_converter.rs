//! Turns an instance group and its BPM configs into the workloads of one instance group, and the
//! manifest's variables into secret generation requests.
use std::collections::{BTreeMap, BTreeSet};

use bosh_manifest::{
    Manifest, bpm,
    manifest::{InstanceGroup, Lifecycle, Variable, VariableType},
    names,
};
use k8s_openapi::{
    api::{
        apps::v1::{StatefulSet, StatefulSetSpec},
        batch::v1::{JobSpec, JobTemplateSpec},
        core::v1::{
            PersistentVolumeClaim, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
            Volume,
        },
    },
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference},
        util::intstr::IntOrString,
    },
};
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::{
    builder::meta::ObjectMetaBuilder,
    config::OperatorImage,
    converter::{
        container_factory::{self, ContainerFactory},
        volume_factory::{self, generate_bpm_disks, generate_default_disks},
    },
    crd::{
        CertificateRequest, LABEL_DEPLOYMENT_NAME, LABEL_INSTANCE_GROUP_NAME, QuarksJob,
        QuarksJobSpec, QuarksSecret, QuarksSecretSpec, QuarksStatefulSet, QuarksStatefulSetSpec,
        Request, SecretReference, Strategy, Trigger,
    },
};

const CERTIFICATE_KEY: &str = "certificate";
const PRIVATE_KEY_KEY: &str = "private_key";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to generate the disks of instance group {instance_group:?}"))]
    GenerateDisks {
        source: volume_factory::Error,
        instance_group: String,
    },

    #[snafu(display("failed to generate the containers of instance group {instance_group:?}"))]
    GenerateContainers {
        source: container_factory::Error,
        instance_group: String,
    },
}

/// The workloads of one instance group.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resources {
    pub instance_groups: Vec<QuarksStatefulSet>,
    pub errands: Vec<QuarksJob>,
    pub services: Vec<Service>,
}

pub struct KubeConverter<'a> {
    pub namespace: &'a str,
    pub operator_image: &'a OperatorImage,
    pub owner: Option<&'a OwnerReference>,
}

impl KubeConverter<'_> {
    /// One secret generation request per manifest variable. Certificates signed by a CA refer to
    /// the secret generated for the CA variable.
    pub fn variables(&self, manifest: &Manifest) -> Vec<QuarksSecret> {
        manifest
            .variables
            .iter()
            .map(|variable| self.quarks_secret(&manifest.name, variable))
            .collect()
    }

    fn quarks_secret(&self, deployment: &str, variable: &Variable) -> QuarksSecret {
        let secret_name = names::implicit_variable_secret_name(deployment, &variable.name);

        let request = (variable.variable_type == VariableType::Certificate).then(|| {
            let options = variable.options.clone().unwrap_or_default();
            let ca_secret = options
                .ca
                .as_deref()
                .map(|ca| names::implicit_variable_secret_name(deployment, ca));
            Request {
                certificate: Some(CertificateRequest {
                    common_name: options.common_name,
                    alternative_names: options.alternative_names,
                    is_ca: options.is_ca,
                    ca_ref: ca_secret.clone().map(|name| SecretReference {
                        name,
                        key: CERTIFICATE_KEY.to_owned(),
                    }),
                    ca_key_ref: ca_secret.map(|name| SecretReference {
                        name,
                        key: PRIVATE_KEY_KEY.to_owned(),
                    }),
                    signer_type: options.signer_type,
                }),
            }
        });

        QuarksSecret {
            metadata: self.object_meta(&secret_name, deployment, None),
            spec: QuarksSecretSpec {
                secret_type: variable.variable_type.to_string(),
                request,
                secret_name,
            },
        }
    }

    /// The workload of `instance_group`: a QuarksStatefulSet for services or a QuarksJob for
    /// errands, plus a headless service when its jobs declare ports.
    pub fn bpm_resources(
        &self,
        manifest: &Manifest,
        instance_group: &InstanceGroup,
        bpm_configs: &bpm::Configs,
        resolved_secret_version: &str,
        initial_rollout: bool,
    ) -> Result<Resources> {
        let deployment = manifest.name.as_str();
        let ig = instance_group.name.as_str();

        let default_disks = generate_default_disks(
            deployment,
            instance_group,
            resolved_secret_version,
            self.namespace,
        );
        let bpm_disks = generate_bpm_disks(instance_group, bpm_configs, self.namespace)
            .context(GenerateDisksSnafu { instance_group: ig })?;
        let default_mounts = default_disks.volume_mounts();

        let factory = ContainerFactory {
            instance_group: ig,
            manifest,
            bpm_configs,
            operator_image: self.operator_image,
            replicas: instance_group.instances,
            initial_rollout,
        };
        let containers = factory
            .jobs_to_containers(&instance_group.jobs, &default_mounts, &bpm_disks)
            .context(GenerateContainersSnafu { instance_group: ig })?;
        let init_containers = factory
            .jobs_to_init_containers(
                &instance_group.jobs,
                &default_mounts,
                &bpm_disks,
                instance_group.properties.quarks.required_service.as_deref(),
            )
            .context(GenerateContainersSnafu { instance_group: ig })?;

        let claims = dedup_claims(
            default_disks
                .persistent_volume_claims()
                .into_iter()
                .chain(bpm_disks.persistent_volume_claims()),
        );
        let volumes = pod_volumes(
            default_disks.volumes().into_iter().chain(bpm_disks.volumes()),
            &claims,
        );

        let pod_template = pod_template(
            deployment,
            instance_group,
            PodSpec {
                init_containers: Some(init_containers),
                containers,
                volumes: Some(volumes),
                ..PodSpec::default()
            },
        );

        debug!(
            instance_group = ig,
            lifecycle = %instance_group.lifecycle,
            claims = claims.len(),
            "converted instance group"
        );

        let mut resources = Resources::default();
        if instance_group.lifecycle.is_errand() {
            resources
                .errands
                .push(self.errand(deployment, instance_group, pod_template));
            return Ok(resources);
        }

        let service = self.service(deployment, instance_group);
        resources.instance_groups.push(self.stateful_set(
            deployment,
            instance_group,
            pod_template,
            claims,
            service.as_ref().and_then(|s| s.metadata.name.clone()),
        ));
        resources.services.extend(service);
        Ok(resources)
    }

    fn stateful_set(
        &self,
        deployment: &str,
        instance_group: &InstanceGroup,
        template: PodTemplateSpec,
        claims: Vec<PersistentVolumeClaim>,
        service_name: Option<String>,
    ) -> QuarksStatefulSet {
        let name = names::sanitize(&instance_group.name);
        let labels = instance_group_labels(deployment, &instance_group.name);
        let stateful_set = StatefulSet {
            metadata: ObjectMetaBuilder::new()
                .name(&name)
                .with_labels(labels.clone())
                .build(),
            spec: Some(StatefulSetSpec {
                replicas: Some(instance_group.instances),
                pod_management_policy: Some("Parallel".to_owned()),
                selector: LabelSelector {
                    match_labels: Some(labels),
                    ..LabelSelector::default()
                },
                service_name,
                template,
                volume_claim_templates: (!claims.is_empty()).then_some(claims),
                ..StatefulSetSpec::default()
            }),
            ..StatefulSet::default()
        };

        QuarksStatefulSet {
            metadata: self.object_meta(&name, deployment, Some(&instance_group.name)),
            spec: QuarksStatefulSetSpec {
                template: stateful_set,
                update_on_config_change: true,
                zones: instance_group.azs.clone(),
            },
        }
    }

    /// Errands are only run on request, auto errands once when they are created or updated.
    fn errand(
        &self,
        deployment: &str,
        instance_group: &InstanceGroup,
        mut template: PodTemplateSpec,
    ) -> QuarksJob {
        let auto = instance_group.lifecycle == Lifecycle::AutoErrand;
        if let Some(spec) = template.spec.as_mut() {
            spec.restart_policy = Some("OnFailure".to_owned());
        }

        QuarksJob {
            metadata: self.object_meta(
                &names::sanitize(&instance_group.name),
                deployment,
                Some(&instance_group.name),
            ),
            spec: QuarksJobSpec {
                trigger: Trigger {
                    strategy: if auto { Strategy::Once } else { Strategy::Manual },
                },
                template: JobTemplateSpec {
                    spec: Some(JobSpec {
                        template,
                        ..JobSpec::default()
                    }),
                    ..JobTemplateSpec::default()
                },
                output: None,
                update_on_config_change: auto,
            },
        }
    }

    /// A headless service selecting the pods of the instance group, with the ports of all jobs.
    fn service(&self, deployment: &str, instance_group: &InstanceGroup) -> Option<Service> {
        let mut seen = BTreeSet::new();
        let ports: Vec<ServicePort> = instance_group
            .jobs
            .iter()
            .flat_map(|job| &job.properties.quarks.ports)
            .filter(|port| seen.insert(port.name.as_str()))
            .map(|port| ServicePort {
                name: Some(port.name.to_lowercase()),
                protocol: Some(port.protocol.clone()),
                port: port.internal,
                target_port: Some(IntOrString::Int(port.internal)),
                ..ServicePort::default()
            })
            .collect();

        if ports.is_empty() {
            return None;
        }

        let name = names::sanitize(&format!("{deployment}-{}", instance_group.name));
        Some(Service {
            metadata: self.object_meta(&name, deployment, Some(&instance_group.name)),
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".to_owned()),
                ports: Some(ports),
                selector: Some(instance_group_labels(deployment, &instance_group.name)),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        })
    }

    fn object_meta(
        &self,
        name: &str,
        deployment: &str,
        instance_group: Option<&str>,
    ) -> ObjectMeta {
        let mut builder = ObjectMetaBuilder::for_deployment(name, self.namespace, deployment);
        if let Some(instance_group) = instance_group {
            builder.instance_group(instance_group);
        }
        builder.owner(self.owner).build()
    }
}

/// Adds the scheduling settings and the labels of the instance group to the pod spec.
fn pod_template(
    deployment: &str,
    instance_group: &InstanceGroup,
    spec: PodSpec,
) -> PodTemplateSpec {
    let settings = instance_group.agent_settings();
    let mut labels = settings.labels.clone();
    labels.extend(instance_group_labels(deployment, &instance_group.name));

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            annotations: (!settings.annotations.is_empty()).then(|| settings.annotations.clone()),
            ..ObjectMeta::default()
        }),
        spec: Some(PodSpec {
            affinity: settings.affinity.clone(),
            tolerations: (!settings.tolerations.is_empty()).then(|| settings.tolerations.clone()),
            service_account_name: settings.service_account_name.clone(),
            ..spec
        }),
    }
}

fn instance_group_labels(deployment: &str, instance_group: &str) -> BTreeMap<String, String> {
    [
        (LABEL_DEPLOYMENT_NAME.to_owned(), deployment.to_owned()),
        (LABEL_INSTANCE_GROUP_NAME.to_owned(), instance_group.to_owned()),
    ]
    .into()
}

fn dedup_claims(
    claims: impl IntoIterator<Item = PersistentVolumeClaim>,
) -> Vec<PersistentVolumeClaim> {
    let mut seen = BTreeSet::new();
    claims
        .into_iter()
        .filter(|claim| seen.insert(claim.metadata.name.clone()))
        .collect()
}

/// Volumes de-duplicated by name. Volumes backed by a claim template are provided by the stateful
/// set and dropped.
fn pod_volumes(
    volumes: impl IntoIterator<Item = Volume>,
    claims: &[PersistentVolumeClaim],
) -> Vec<Volume> {
    let claim_names: BTreeSet<&str> = claims
        .iter()
        .filter_map(|claim| claim.metadata.name.as_deref())
        .collect();
    let mut seen = BTreeSet::new();
    volumes
        .into_iter()
        .filter(|volume| !claim_names.contains(volume.name.as_str()))
        .filter(|volume| seen.insert(volume.name.clone()))
        .collect()
}
