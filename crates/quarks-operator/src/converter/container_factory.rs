//! Init containers and run containers of an instance group's pods.
use std::collections::{BTreeMap, BTreeSet};

use bosh_manifest::{
    Manifest, bpm,
    manifest::{self, Job},
    names,
    render::env,
};
use k8s_openapi::{
    api::core::v1::{Container, EnvVar, ResourceRequirements, VolumeMount},
    apimachinery::pkg::api::resource::Quantity,
};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use crate::{
    builder::pod::{
        container::{ContainerBuilder, ContainerPortBuilder, FieldPathEnvVar},
        security::{ROOT_USER_ID, SecurityContextBuilder, VCAP_USER_ID},
    },
    config::OperatorImage,
    converter::{
        disk::{DiskKind, DiskSelector, Disks},
        volume_factory::{
            DATA_DIR_MOUNT_PATH, JOBS_DIR_MOUNT_PATH, JOBS_SRC_DIR, RENDERING_DATA_MOUNT_PATH,
            SYS_DIR_MOUNT_PATH, data_dir_volume_mount, jobs_dir_volume_mount,
            rendering_data_volume_mount, resolved_properties_mount_path,
            resolved_properties_volume_mount, sys_dir_volume_mount,
        },
    },
    crd::{LABEL_AZ_INDEX, LABEL_POD_ORDINAL},
};

/// Every container runs its command through dumb-init, which reaps zombies and forwards signals.
const ENTRYPOINT: [&str; 2] = ["/usr/bin/dumb-init", "--"];

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("instance group {instance_group:?} has no jobs defined"))]
    NoJobs { instance_group: String },

    #[snafu(display("failed to lookup bpm config for bosh job {job:?} in bpm configs"))]
    MissingBpmConfig { job: String },

    #[snafu(display("bpm info of bosh job {job:?} has no processes"))]
    NoProcesses { job: String },

    #[snafu(display("failed to determine the image of bosh job {job:?}"))]
    ReleaseImage {
        source: manifest::Error,
        job: String,
    },
}

/// Builds the containers of one instance group.
pub struct ContainerFactory<'a> {
    pub instance_group: &'a str,
    pub manifest: &'a Manifest,
    pub bpm_configs: &'a bpm::Configs,
    pub operator_image: &'a OperatorImage,
    pub replicas: i32,
    /// Whether this is the first rollout of the instance group.
    pub initial_rollout: bool,
}

impl ContainerFactory<'_> {
    /// The init containers, in order: spec copiers, container-run copier, template render, dir
    /// creation, the optional service wait, BOSH pre-start and BPM pre-start containers.
    pub fn jobs_to_init_containers(
        &self,
        jobs: &[Job],
        default_mounts: &[VolumeMount],
        disks: &Disks,
        required_service: Option<&str>,
    ) -> Result<Vec<Container>> {
        let mut spec_copiers = Vec::new();
        let mut bosh_pre_starts = Vec::new();
        let mut bpm_pre_starts = Vec::new();
        let mut copied_releases = BTreeSet::new();

        for job in jobs {
            let image = self.job_image(job)?;
            let config = self.bpm_config(job)?;
            let quarks = &job.properties.quarks;

            if copied_releases.insert(job.release.as_str()) {
                spec_copiers.push(spec_copier_container(&job.release, &image));
            }

            let job_disks = disks.filter(DiskSelector::Job(&job.name));

            if config.pre_start_script {
                let mut mounts = default_mounts.to_vec();
                mounts.extend(job_disks.volume_mounts());
                bosh_pre_starts.push(self.bosh_pre_start_container(job, &image, mounts));
            }

            let ephemeral_mount = job_disks
                .filter(DiskSelector::Kind(DiskKind::Ephemeral))
                .volume_mounts()
                .into_iter()
                .next();
            let persistent_mount = job_disks
                .filter(DiskSelector::Kind(DiskKind::Persistent))
                .volume_mounts()
                .into_iter()
                .next();

            for process in &config.processes {
                let Some(hook) = process.pre_start_hook() else {
                    continue;
                };
                let mut mounts = default_mounts.to_vec();
                mounts.extend(
                    job_disks
                        .filter(DiskSelector::Process(&process.name))
                        .volume_mounts(),
                );
                mounts.extend(ephemeral_mount.clone());
                mounts.extend(persistent_mount.clone());

                let security_context =
                    SecurityContextBuilder::with_base(quarks.run.security_context.clone())
                        .default_capabilities(&process.capabilities)
                        .default_privileged(process.unsafe_.privileged)
                        .run_as_user(ROOT_USER_ID)
                        .build();

                let name = names::sanitize(&format!("bpm-pre-start-{}", process.name));
                let mut builder = ContainerBuilder::new(name);
                builder
                    .image(&image)
                    .command(entrypoint())
                    .args(shell(&debuggable(hook, quarks.debug)))
                    .add_volume_mounts(mounts)
                    .security_context(security_context);
                self.add_instance_env(&mut builder);
                bpm_pre_starts.push(builder.build());
            }
        }

        let mut containers = spec_copiers;
        containers.push(self.container_run_copier());
        containers.push(self.template_render_container());
        containers.push(self.create_dirs_container(jobs));
        containers.extend(required_service.map(|service| self.wait_for_container(service)));
        containers.extend(bosh_pre_starts);
        containers.extend(bpm_pre_starts);
        Ok(containers)
    }

    /// One container per BPM process of every job, named `<job>-<process>`.
    pub fn jobs_to_containers(
        &self,
        jobs: &[Job],
        default_mounts: &[VolumeMount],
        disks: &Disks,
    ) -> Result<Vec<Container>> {
        ensure!(
            !jobs.is_empty(),
            NoJobsSnafu {
                instance_group: self.instance_group
            }
        );

        let mut containers = Vec::new();
        for job in jobs {
            let image = self.job_image(job)?;
            let config = self.bpm_config(job)?;
            ensure!(
                !config.processes.is_empty(),
                NoProcessesSnafu { job: &job.name }
            );

            let job_disks = disks.filter(DiskSelector::Job(&job.name));
            for (index, process) in config.processes.iter().enumerate() {
                let mounts = job_disks
                    .iter()
                    .filter(|disk| {
                        disk.tags
                            .process
                            .as_ref()
                            .is_none_or(|name| *name == process.name)
                    })
                    .filter_map(|disk| disk.volume_mount.clone());

                let mut builder = ContainerBuilder::new(names::sanitize(&format!(
                    "{}-{}",
                    job.name, process.name
                )));
                builder
                    .image(&image)
                    .command(vec![process.executable.clone()])
                    .args(process.args.clone())
                    .working_dir(process.workdir.as_deref())
                    .add_env_vars(merge_env(&job.properties.quarks.envs, &process.env))
                    .add_volume_mounts(default_mounts.iter().cloned())
                    .add_volume_mounts(mounts)
                    .security_context(
                        SecurityContextBuilder::new()
                            .default_capabilities(&process.capabilities)
                            .privileged(process.unsafe_.privileged)
                            .build(),
                    );

                if let Some(resources) = resources(process) {
                    builder.resources(resources);
                }

                if let Some(check) = job.properties.quarks.run.healthcheck.get(&process.name) {
                    builder
                        .readiness_probe(check.readiness_probe.clone())
                        .liveness_probe(check.liveness_probe.clone());
                }

                // Ports are exposed once per job.
                if index == 0 {
                    builder.add_container_ports(job.properties.quarks.ports.iter().map(|port| {
                        ContainerPortBuilder::new(port.internal)
                            .name(&port.name)
                            .protocol(&port.protocol)
                            .build()
                    }));
                }

                containers.push(builder.build());
            }
        }

        Ok(containers)
    }

    fn job_image(&self, job: &Job) -> Result<String> {
        self.manifest
            .release_image(self.instance_group, &job.name)
            .context(ReleaseImageSnafu { job: &job.name })
    }

    fn bpm_config(&self, job: &Job) -> Result<&bpm::Config> {
        self.bpm_configs
            .get(&job.name)
            .context(MissingBpmConfigSnafu { job: &job.name })
    }

    fn operator_container(&self, name: &str) -> ContainerBuilder {
        let mut builder = ContainerBuilder::new(name);
        builder
            .image(&self.operator_image.image)
            .image_pull_policy(&self.operator_image.pull_policy)
            .command(entrypoint());
        builder
    }

    /// The pod's position, so that templates can be rendered for the right instance.
    fn add_instance_env(&self, builder: &mut ContainerBuilder) {
        builder
            .add_env_var_from_field_path(
                env::POD_ORDINAL,
                &FieldPathEnvVar::Labels(LABEL_POD_ORDINAL.to_owned()),
            )
            .add_env_var(env::REPLICAS, self.replicas.to_string())
            .add_env_var_from_field_path(
                env::AZ_INDEX,
                &FieldPathEnvVar::Labels(LABEL_AZ_INDEX.to_owned()),
            );
    }

    fn container_run_copier(&self) -> Container {
        let target = format!("{RENDERING_DATA_MOUNT_PATH}/container-run");
        self.operator_container("container-run-copier")
            .args(shell(&format!(
                "set -o errexit\nmkdir -p '{target}'\ntime cp /usr/local/bin/container-run \
                 '{target}'/container-run"
            )))
            .add_volume_mounts([rendering_data_volume_mount()])
            .build()
    }

    fn template_render_container(&self) -> Container {
        let mut builder = self.operator_container("template-render");
        builder
            .args(shell("time quarks-operator util template-render"))
            .add_volume_mounts([
                rendering_data_volume_mount(),
                jobs_dir_volume_mount(),
                resolved_properties_volume_mount(self.instance_group),
            ])
            .add_env_var(env::INSTANCE_GROUP_NAME, self.instance_group)
            .add_env_var(
                env::BOSH_MANIFEST_PATH,
                format!(
                    "{}/properties.yaml",
                    resolved_properties_mount_path(self.instance_group)
                ),
            )
            .add_env_var(env::JOBS_DIR, RENDERING_DATA_MOUNT_PATH)
            .add_env_var_from_field_path(env::POD_IP, &FieldPathEnvVar::PodIp);
        self.add_instance_env(&mut builder);
        if !self.initial_rollout {
            builder.add_env_var(env::INITIAL_ROLLOUT, "false");
        }
        builder.build()
    }

    fn create_dirs_container(&self, jobs: &[Job]) -> Container {
        let dirs: Vec<String> = jobs.iter().flat_map(|job| job_dirs(&job.name)).collect();
        self.operator_container("create-dirs")
            .args(shell(&format!("time mkdir -p {}", dirs.join(" "))))
            .add_volume_mounts([
                data_dir_volume_mount(self.instance_group),
                sys_dir_volume_mount(),
            ])
            .security_context(
                SecurityContextBuilder::new()
                    .run_as_user(VCAP_USER_ID)
                    .build(),
            )
            .build()
    }

    fn wait_for_container(&self, service: &str) -> Container {
        self.operator_container(&names::sanitize(&format!("wait-for-{service}")))
            .args(shell(&format!("time quarks-operator util wait {service}")))
            .build()
    }

    fn bosh_pre_start_container(
        &self,
        job: &Job,
        image: &str,
        mounts: Vec<VolumeMount>,
    ) -> Container {
        let quarks = &job.properties.quarks;
        let script = format!("{JOBS_DIR_MOUNT_PATH}/{}/bin/pre-start", job.name);
        let script = if quarks.debug {
            format!(
                r#"if [ -x "{script}" ]; then "{script}" || ( echo "Debug window 1hr" ; sleep 3600 ); fi"#
            )
        } else {
            format!(r#"if [ -x "{script}" ]; then time "{script}" ; fi"#)
        };

        let mut builder =
            ContainerBuilder::new(names::sanitize(&format!("bosh-pre-start-{}", job.name)));
        builder
            .image(image)
            .command(entrypoint())
            .args(shell(&script))
            .add_volume_mounts(mounts)
            .security_context(
                SecurityContextBuilder::with_base(quarks.run.security_context.clone())
                    .run_as_user(ROOT_USER_ID)
                    .build(),
            );
        self.add_instance_env(&mut builder);
        builder.build()
    }
}

/// Copies the job specs of a release image to the rendering volume.
pub(crate) fn spec_copier_container(release: &str, image: &str) -> Container {
    let target = format!("{RENDERING_DATA_MOUNT_PATH}/jobs-src/{release}");
    ContainerBuilder::new(names::sanitize(&format!("spec-copier-{release}")))
        .image(image)
        .command(entrypoint())
        .args(shell(&format!(
            r#"mkdir -p "{target}" && time cp -ar {JOBS_SRC_DIR}/* "{target}""#
        )))
        .add_volume_mounts([rendering_data_volume_mount()])
        .build()
}

/// Directories BOSH jobs expect to exist: logs and runtime files on the data and sys volumes.
fn job_dirs(job: &str) -> [String; 5] {
    [
        format!("{DATA_DIR_MOUNT_PATH}/{job}"),
        format!("{DATA_DIR_MOUNT_PATH}/sys/log/{job}"),
        format!("{DATA_DIR_MOUNT_PATH}/sys/run/{job}"),
        format!("{SYS_DIR_MOUNT_PATH}/log/{job}"),
        format!("{SYS_DIR_MOUNT_PATH}/run/{job}"),
    ]
}

/// Keeps a failing command's container alive for an hour in debug mode.
fn debuggable(command: &str, debug: bool) -> String {
    if debug {
        format!(r#"{command} || ( echo "Debug window 1hr" ; sleep 3600 )"#)
    } else {
        format!("time {command}")
    }
}

pub(crate) fn entrypoint() -> Vec<String> {
    ENTRYPOINT.into_iter().map(String::from).collect()
}

pub(crate) fn shell(script: &str) -> Vec<String> {
    vec!["/bin/sh".to_owned(), "-xc".to_owned(), script.to_owned()]
}

/// Job environment overlaid with the process environment, sorted by name.
fn merge_env(job_env: &[EnvVar], process_env: &BTreeMap<String, String>) -> Vec<EnvVar> {
    let mut merged: BTreeMap<&str, EnvVar> = job_env
        .iter()
        .map(|var| (var.name.as_str(), var.clone()))
        .collect();
    for (name, value) in process_env {
        merged.insert(
            name,
            EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..EnvVar::default()
            },
        );
    }
    merged.into_values().collect()
}

fn resources(process: &bpm::Process) -> Option<ResourceRequirements> {
    let requests: BTreeMap<String, Quantity> = process
        .requests
        .iter()
        .map(|(name, value)| (name.clone(), Quantity(value.clone())))
        .collect();
    let limits: BTreeMap<String, Quantity> = process
        .limits
        .memory
        .iter()
        .map(|memory| ("memory".to_owned(), Quantity(memory.clone())))
        .collect();

    (!requests.is_empty() || !limits.is_empty()).then(|| ResourceRequirements {
        requests: (!requests.is_empty()).then_some(requests),
        limits: (!limits.is_empty()).then_some(limits),
        ..ResourceRequirements::default()
    })
}

#[cfg(test)]
mod tests {
    use bosh_manifest::bpm::{Config, Hooks, Process};
    use indoc::indoc;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::converter::volume_factory::{generate_bpm_disks, generate_default_disks};

    #[fixture]
    fn manifest() -> Manifest {
        Manifest::from_yaml(indoc! {"
            name: cf
            releases:
            - name: capi
              version: 1.2.3
              url: docker.io/cfcontainerization
              stemcell: {os: opensuse-42.3, version: 36.g03b4653-30.80-7.0.0_316.gcf9fe4a7}
            instance_groups:
            - name: api
              instances: 2
              jobs:
              - name: cloud_controller_ng
                release: capi
                properties:
                  quarks:
                    envs:
                    - {name: SHARED, value: job}
                    - {name: ONLY_JOB, value: job}
                    ports:
                    - {name: api, protocol: TCP, internal: 9022}
                    run:
                      healthcheck:
                        ccng:
                          readiness:
                            exec:
                              command: [curl, localhost:9022]
              - name: policy_server
                release: capi
        "})
        .expect("manifest must parse")
    }

    #[fixture]
    fn configs() -> bpm::Configs {
        [
            (
                "cloud_controller_ng".to_owned(),
                Config {
                    processes: vec![Process {
                        name: "ccng".to_owned(),
                        executable: "/var/vcap/packages/capi/bin/ccng".to_owned(),
                        args: vec!["-c".to_owned(), "config.yml".to_owned()],
                        env: [("SHARED".to_owned(), "process".to_owned())].into(),
                        workdir: Some("/var/vcap/jobs/cloud_controller_ng".to_owned()),
                        capabilities: vec!["NET_BIND_SERVICE".to_owned()],
                        ephemeral_disk: Some(true),
                        ..Process::default()
                    }],
                    pre_start_script: true,
                    ..Config::default()
                },
            ),
            (
                "policy_server".to_owned(),
                Config {
                    processes: vec![Process {
                        name: "policy-server".to_owned(),
                        executable: "/var/vcap/packages/policy/bin/policy-server".to_owned(),
                        hooks: Hooks {
                            pre_start: Some(
                                "/var/vcap/jobs/policy_server/bin/bpm-pre-start".to_owned(),
                            ),
                        },
                        ..Process::default()
                    }],
                    ..Config::default()
                },
            ),
        ]
        .into()
    }

    fn operator_image() -> OperatorImage {
        OperatorImage {
            image: "quarks-operator:dev".to_owned(),
            pull_policy: "IfNotPresent".to_owned(),
        }
    }

    fn names(containers: &[Container]) -> Vec<&str> {
        containers.iter().map(|c| c.name.as_str()).collect()
    }

    #[rstest]
    fn init_container_order(manifest: Manifest, configs: bpm::Configs) {
        let ig = &manifest.instance_groups[0];
        let image = operator_image();
        let factory = ContainerFactory {
            instance_group: &ig.name,
            manifest: &manifest,
            bpm_configs: &configs,
            operator_image: &image,
            replicas: ig.instances,
            initial_rollout: true,
        };
        let disks = generate_bpm_disks(ig, &configs, "default").expect("disks must be generated");
        let default_mounts = generate_default_disks("cf", ig, "1", "default").volume_mounts();

        let containers = factory
            .jobs_to_init_containers(&ig.jobs, &default_mounts, &disks, Some("database"))
            .expect("init containers must be generated");

        assert_eq!(
            names(&containers),
            vec![
                "spec-copier-capi",
                "container-run-copier",
                "template-render",
                "create-dirs",
                "wait-for-database",
                "bosh-pre-start-cloud-controller-ng",
                "bpm-pre-start-policy-server",
            ]
        );

        let bosh_pre_start = &containers[5];
        assert_eq!(
            bosh_pre_start.image.as_deref(),
            Some(
                "docker.io/cfcontainerization/capi:opensuse-42.3-36.g03b4653-30.80-7.0.0_316.\
                 gcf9fe4a7-1.2.3"
            )
        );
        assert_eq!(
            bosh_pre_start.security_context.as_ref().and_then(|s| s.run_as_user),
            Some(0)
        );
        let mounts: Vec<_> = bosh_pre_start
            .volume_mounts
            .iter()
            .flatten()
            .map(|m| m.mount_path.as_str())
            .collect();
        assert!(mounts.contains(&"/var/vcap/data/cloud_controller_ng"));

        let bpm_pre_start = &containers[6];
        assert_eq!(
            bpm_pre_start.args.as_ref().map(|args| args[2].as_str()),
            Some("time /var/vcap/jobs/policy_server/bin/bpm-pre-start")
        );
        assert_eq!(
            bpm_pre_start.command,
            Some(vec!["/usr/bin/dumb-init".to_owned(), "--".to_owned()])
        );
    }

    #[rstest]
    fn bosh_pre_start_needs_a_recorded_script(manifest: Manifest, mut configs: bpm::Configs) {
        for config in configs.values_mut() {
            config.pre_start_script = false;
        }
        let ig = &manifest.instance_groups[0];
        let image = operator_image();
        let factory = ContainerFactory {
            instance_group: &ig.name,
            manifest: &manifest,
            bpm_configs: &configs,
            operator_image: &image,
            replicas: ig.instances,
            initial_rollout: true,
        };
        let disks = generate_bpm_disks(ig, &configs, "default").expect("disks must be generated");

        let containers = factory
            .jobs_to_init_containers(&ig.jobs, &[], &disks, None)
            .expect("init containers must be generated");

        assert_eq!(
            names(&containers),
            vec![
                "spec-copier-capi",
                "container-run-copier",
                "template-render",
                "create-dirs",
                "bpm-pre-start-policy-server",
            ]
        );
    }

    #[rstest]
    fn template_render_environment(manifest: Manifest, configs: bpm::Configs) {
        let ig = &manifest.instance_groups[0];
        let image = operator_image();
        let factory = ContainerFactory {
            instance_group: &ig.name,
            manifest: &manifest,
            bpm_configs: &configs,
            operator_image: &image,
            replicas: 2,
            initial_rollout: false,
        };

        let render = factory.template_render_container();
        let env: BTreeMap<_, _> = render
            .env
            .iter()
            .flatten()
            .map(|var| (var.name.as_str(), var))
            .collect();

        assert_eq!(
            env["BOSH_MANIFEST_PATH"].value.as_deref(),
            Some("/var/run/secrets/resolved-properties/api/properties.yaml")
        );
        assert_eq!(env["REPLICAS"].value.as_deref(), Some("2"));
        assert_eq!(env["INITIAL_ROLLOUT"].value.as_deref(), Some("false"));
        assert_eq!(
            env["POD_IP"]
                .value_from
                .as_ref()
                .and_then(|v| v.field_ref.as_ref())
                .map(|f| f.field_path.as_str()),
            Some("status.podIP")
        );
        assert_eq!(render.image_pull_policy.as_deref(), Some("IfNotPresent"));
    }

    #[rstest]
    fn debug_keeps_failed_pre_starts_alive() {
        assert_eq!(
            debuggable("/bin/pre", true),
            r#"/bin/pre || ( echo "Debug window 1hr" ; sleep 3600 )"#
        );
        assert_eq!(debuggable("/bin/pre", false), "time /bin/pre");
    }

    #[rstest]
    fn run_containers(manifest: Manifest, configs: bpm::Configs) {
        let ig = &manifest.instance_groups[0];
        let image = operator_image();
        let factory = ContainerFactory {
            instance_group: &ig.name,
            manifest: &manifest,
            bpm_configs: &configs,
            operator_image: &image,
            replicas: 2,
            initial_rollout: true,
        };
        let disks = generate_bpm_disks(ig, &configs, "default").expect("disks must be generated");

        let containers = factory
            .jobs_to_containers(&ig.jobs, &[], &disks)
            .expect("containers must be generated");

        assert_eq!(
            names(&containers),
            vec!["cloud-controller-ng-ccng", "policy-server-policy-server"]
        );
        let ccng = &containers[0];
        assert_eq!(
            ccng.command,
            Some(vec!["/var/vcap/packages/capi/bin/ccng".to_owned()])
        );
        assert_eq!(
            ccng.working_dir.as_deref(),
            Some("/var/vcap/jobs/cloud_controller_ng")
        );
        let env: Vec<_> = ccng
            .env
            .iter()
            .flatten()
            .map(|var| (var.name.as_str(), var.value.as_deref()))
            .collect();
        assert_eq!(
            env,
            vec![("ONLY_JOB", Some("job")), ("SHARED", Some("process"))]
        );
        assert!(ccng.readiness_probe.is_some());
        assert!(ccng.liveness_probe.is_none());
        assert_eq!(
            ccng.security_context
                .as_ref()
                .and_then(|s| s.capabilities.as_ref())
                .and_then(|c| c.add.clone()),
            Some(vec!["NET_BIND_SERVICE".to_owned()])
        );
        assert_eq!(ccng.ports.as_ref().map(Vec::len), Some(1));
        assert_eq!(
            ccng.volume_mounts
                .iter()
                .flatten()
                .map(|m| m.mount_path.as_str())
                .collect::<Vec<_>>(),
            vec!["/var/vcap/data/cloud_controller_ng"]
        );
    }

    #[rstest]
    fn run_containers_need_processes(manifest: Manifest, mut configs: bpm::Configs) {
        let ig = &manifest.instance_groups[0];
        let image = operator_image();
        let run = |configs: &bpm::Configs, jobs: &[Job]| {
            ContainerFactory {
                instance_group: &ig.name,
                manifest: &manifest,
                bpm_configs: configs,
                operator_image: &image,
                replicas: 2,
                initial_rollout: true,
            }
            .jobs_to_containers(jobs, &[], &Disks::new())
        };

        assert!(matches!(run(&configs, &[]), Err(Error::NoJobs { .. })));

        configs.insert("policy_server".to_owned(), Config::default());
        assert!(matches!(
            run(&configs, &ig.jobs),
            Err(Error::NoProcesses { job }) if job == "policy_server"
        ));

        configs.remove("policy_server");
        assert!(matches!(
            run(&configs, &ig.jobs),
            Err(Error::MissingBpmConfig { job }) if job == "policy_server"
        ));
    }
}
