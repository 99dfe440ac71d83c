//! Volumes, mounts and claims of an instance group's pods.
//!
//! Every pod gets the same default disks. BPM adds per job and per process disks on top, which
//! are carved out of the default data, store and sys volumes with sub paths.
use std::path::Path;

use bosh_manifest::{
    bpm,
    manifest::{InstanceGroup, Job},
    names::{self, DeploymentSecretType},
};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, VolumeMount};
use snafu::{OptionExt, Snafu};

use crate::{
    builder::pod::volume::{
        MEMORY_MEDIUM, PersistentVolumeClaimBuilder, VolumeBuilder, VolumeMountBuilder,
    },
    converter::disk::{Disk, DiskKind, DiskTags, Disks},
};

pub const RENDERING_DATA_VOLUME: &str = "rendering-data";
pub const RENDERING_DATA_MOUNT_PATH: &str = "/var/vcap/all-releases";

pub const JOBS_DIR_VOLUME: &str = "jobs-dir";
pub const JOBS_DIR_MOUNT_PATH: &str = "/var/vcap/jobs";

/// Where release images keep their job specs.
pub const JOBS_SRC_DIR: &str = "/var/vcap/jobs-src";

pub const DATA_DIR_MOUNT_PATH: &str = "/var/vcap/data";

pub const SYS_DIR_VOLUME: &str = "sys-dir";
pub const SYS_DIR_MOUNT_PATH: &str = "/var/vcap/sys";

pub const STORE_DIR_MOUNT_PATH: &str = "/var/vcap/store";

pub const DRAIN_STAMPS_VOLUME: &str = "drain-stamps";
pub const DRAIN_STAMPS_MOUNT_PATH: &str = "/mnt/drain-stamps";

const SYS_RUN_DIR: &str = "/var/vcap/sys/run";
const UNRESTRICTED_VOLUME_BASE_NAME: &str = "bpm-unrestricted-volume";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display(
        "the {path:?} path must be a path inside '/var/vcap/data', '/var/vcap/store' or \
         '/var/vcap/sys/run', for a path outside these use the unrestricted_volumes key"
    ))]
    AdditionalVolumeOutsideAllowedRoots { path: String },

    #[snafu(display(
        "job {job:?} wants to use persistent disk but instance group {instance_group:?} doesn't \
         have any persistent disk declaration"
    ))]
    MissingPersistentDisk { job: String, instance_group: String },
}

/// Name of the ephemeral data volume, and of its claim when the ephemeral disk is persistent.
pub fn data_dir_volume_name(instance_group: &str) -> String {
    names::sanitize(&format!("{instance_group}-ephemeral"))
}

/// Name of the persistent disk claim.
pub fn persistent_volume_claim_name(instance_group: &str) -> String {
    names::sanitize(&format!("{instance_group}-pvc"))
}

/// Where the template render container finds the resolved properties of an instance group.
pub fn resolved_properties_mount_path(instance_group: &str) -> String {
    format!("/var/run/secrets/resolved-properties/{instance_group}")
}

pub fn resolved_properties_volume_mount(instance_group: &str) -> VolumeMount {
    VolumeMountBuilder::new(
        DeploymentSecretType::InstanceGroupResolvedProperties.to_string(),
        resolved_properties_mount_path(instance_group),
    )
    .read_only(true)
    .build()
}

pub fn rendering_data_volume_mount() -> VolumeMount {
    VolumeMountBuilder::new(RENDERING_DATA_VOLUME, RENDERING_DATA_MOUNT_PATH).build()
}

pub fn jobs_dir_volume_mount() -> VolumeMount {
    VolumeMountBuilder::new(JOBS_DIR_VOLUME, JOBS_DIR_MOUNT_PATH).build()
}

pub fn data_dir_volume_mount(instance_group: &str) -> VolumeMount {
    VolumeMountBuilder::new(data_dir_volume_name(instance_group), DATA_DIR_MOUNT_PATH).build()
}

pub fn sys_dir_volume_mount() -> VolumeMount {
    VolumeMountBuilder::new(SYS_DIR_VOLUME, SYS_DIR_MOUNT_PATH).build()
}

/// The disks every pod of an instance group gets, in a fixed order.
pub fn generate_default_disks(
    deployment: &str,
    instance_group: &InstanceGroup,
    resolved_secret_version: &str,
    namespace: &str,
) -> Disks {
    let ig = instance_group.name.as_str();
    let empty_dir = |name: &str| VolumeBuilder::new(name).build();
    let ephemeral_claim = instance_group
        .agent_settings()
        .ephemeral_as_pvc
        .then(|| ephemeral_volume_claim(instance_group, namespace));
    let resolved_properties_secret = names::instance_group_secret_name(
        DeploymentSecretType::InstanceGroupResolvedProperties,
        deployment,
        ig,
        resolved_secret_version,
    );

    [
        Disk {
            volume: Some(empty_dir(RENDERING_DATA_VOLUME)),
            volume_mount: Some(rendering_data_volume_mount()),
            ..Disk::default()
        },
        Disk {
            volume: Some(empty_dir(JOBS_DIR_VOLUME)),
            volume_mount: Some(jobs_dir_volume_mount()),
            ..Disk::default()
        },
        Disk {
            volume: Some(empty_dir(&data_dir_volume_name(ig))),
            volume_mount: Some(data_dir_volume_mount(ig)),
            persistent_volume_claim: ephemeral_claim,
            ..Disk::default()
        },
        Disk {
            volume: Some(empty_dir(SYS_DIR_VOLUME)),
            volume_mount: Some(sys_dir_volume_mount()),
            ..Disk::default()
        },
        Disk {
            volume: Some(
                VolumeBuilder::new(
                    DeploymentSecretType::InstanceGroupResolvedProperties.to_string(),
                )
                .with_secret(resolved_properties_secret, false)
                .build(),
            ),
            ..Disk::default()
        },
        Disk {
            volume: Some(
                VolumeBuilder::new(DRAIN_STAMPS_VOLUME)
                    .with_empty_dir(Some(MEMORY_MEDIUM), None)
                    .build(),
            ),
            volume_mount: Some(
                VolumeMountBuilder::new(DRAIN_STAMPS_VOLUME, DRAIN_STAMPS_MOUNT_PATH).build(),
            ),
            ..Disk::default()
        },
    ]
    .into_iter()
    .collect()
}

/// The disks BPM asks for: additional and unrestricted volumes per process, plus the ephemeral
/// and persistent disk of each job.
pub fn generate_bpm_disks(
    instance_group: &InstanceGroup,
    configs: &bpm::Configs,
    namespace: &str,
) -> Result<Disks> {
    let mut disks = Disks::new();

    for job in &instance_group.jobs {
        let Some(config) = configs.get(&job.name) else {
            continue;
        };

        for process in &config.processes {
            let (additional, unrestricted) = classify_volumes(process);

            for volume in additional {
                disks.push(additional_volume_disk(
                    &instance_group.name,
                    job,
                    process,
                    volume,
                )?);
            }

            for (index, volume) in unrestricted.into_iter().enumerate() {
                let name = names::sanitize(&format!(
                    "{UNRESTRICTED_VOLUME_BASE_NAME}-{job}-{process}-{index:b}",
                    job = job.name,
                    process = process.name,
                ));
                disks.push(Disk {
                    volume: Some(VolumeBuilder::new(&name).build()),
                    volume_mount: Some(
                        VolumeMountBuilder::new(name, &volume.path)
                            .read_only(!volume.writable)
                            .build(),
                    ),
                    tags: DiskTags::job_process(&job.name, &process.name),
                    ..Disk::default()
                });
            }
        }

        if config.processes.iter().any(bpm::Process::uses_ephemeral_disk) {
            disks.push(ephemeral_disk(&instance_group.name, job));
        }

        if config.processes.iter().any(bpm::Process::uses_persistent_disk) {
            disks.push(persistent_disk(instance_group, job, namespace)?);
        }
    }

    Ok(disks)
}

/// Splits the volumes of a process into additional volumes, which are mounted from the default
/// volumes, and unrestricted volumes, which get their own emptyDir.
///
/// Unrestricted volumes below the jobs directory are already mounted everywhere and are dropped.
fn classify_volumes(process: &bpm::Process) -> (Vec<&bpm::Volume>, Vec<&bpm::Volume>) {
    let mut additional: Vec<&bpm::Volume> = process.additional_volumes.iter().collect();
    let mut unrestricted = Vec::new();

    for volume in &process.unsafe_.unrestricted_volumes {
        if Path::new(&volume.path).starts_with(JOBS_DIR_MOUNT_PATH) {
            continue;
        }
        if allowed_root(&volume.path).is_some() {
            additional.push(volume);
        } else {
            unrestricted.push(volume);
        }
    }

    (additional, unrestricted)
}

/// The default volume an additional volume path lives on, and its path relative to that volume.
/// Only paths strictly below the data, store or sys/run directories are allowed.
fn allowed_root(path: &str) -> Option<AllowedRoot> {
    let path = Path::new(path);
    [
        (DATA_DIR_MOUNT_PATH, AllowedRoot::Data),
        (STORE_DIR_MOUNT_PATH, AllowedRoot::Store),
        (SYS_RUN_DIR, AllowedRoot::SysRun),
    ]
    .into_iter()
    .find(|(root, _)| {
        path.strip_prefix(root)
            .is_ok_and(|rest| !rest.as_os_str().is_empty())
    })
    .map(|(_, root)| root)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AllowedRoot {
    Data,
    Store,
    SysRun,
}

impl AllowedRoot {
    fn volume_name(self, instance_group: &str) -> String {
        match self {
            Self::Data => data_dir_volume_name(instance_group),
            Self::Store => persistent_volume_claim_name(instance_group),
            Self::SysRun => SYS_DIR_VOLUME.to_owned(),
        }
    }

    /// The directory the volume is mounted at, sub paths are relative to it.
    fn mount_path(self) -> &'static str {
        match self {
            Self::Data => DATA_DIR_MOUNT_PATH,
            Self::Store => STORE_DIR_MOUNT_PATH,
            Self::SysRun => SYS_DIR_MOUNT_PATH,
        }
    }
}

fn additional_volume_disk(
    instance_group: &str,
    job: &Job,
    process: &bpm::Process,
    volume: &bpm::Volume,
) -> Result<Disk> {
    let root = allowed_root(&volume.path).context(AdditionalVolumeOutsideAllowedRootsSnafu {
        path: &volume.path,
    })?;
    let sub_path = Path::new(&volume.path)
        .strip_prefix(root.mount_path())
        .ok()
        .and_then(Path::to_str)
        .context(AdditionalVolumeOutsideAllowedRootsSnafu { path: &volume.path })?;

    Ok(Disk {
        volume_mount: Some(
            VolumeMountBuilder::new(root.volume_name(instance_group), &volume.path)
                .read_only(!volume.writable)
                .sub_path(sub_path)
                .build(),
        ),
        tags: DiskTags::job_process(&job.name, &process.name),
        ..Disk::default()
    })
}

/// Mounts the job's directory of the data volume. The volume itself, an emptyDir or a claim, is
/// part of the default disks.
fn ephemeral_disk(instance_group: &str, job: &Job) -> Disk {
    Disk {
        volume_mount: Some(
            VolumeMountBuilder::new(
                data_dir_volume_name(instance_group),
                format!("{DATA_DIR_MOUNT_PATH}/{}", job.name),
            )
            .sub_path(&job.name)
            .build(),
        ),
        tags: DiskTags::job_kind(&job.name, DiskKind::Ephemeral),
        ..Disk::default()
    }
}

fn persistent_disk(instance_group: &InstanceGroup, job: &Job, namespace: &str) -> Result<Disk> {
    let size = instance_group
        .persistent_disk
        .filter(|size| *size > 0)
        .context(MissingPersistentDiskSnafu {
            job: &job.name,
            instance_group: &instance_group.name,
        })?;
    let claim_name = persistent_volume_claim_name(&instance_group.name);

    Ok(Disk {
        volume: Some(
            VolumeBuilder::new(&claim_name)
                .with_persistent_volume_claim(&claim_name, false)
                .build(),
        ),
        volume_mount: Some(
            VolumeMountBuilder::new(&claim_name, format!("{STORE_DIR_MOUNT_PATH}/{}", job.name))
                .sub_path(&job.name)
                .build(),
        ),
        persistent_volume_claim: Some(
            PersistentVolumeClaimBuilder::new(claim_name)
                .namespace(namespace)
                .storage_mib(size)
                .storage_class(instance_group.persistent_disk_type.as_deref())
                .build(),
        ),
        tags: DiskTags::job_kind(&job.name, DiskKind::Persistent),
    })
}

fn ephemeral_volume_claim(
    instance_group: &InstanceGroup,
    namespace: &str,
) -> PersistentVolumeClaim {
    PersistentVolumeClaimBuilder::new(data_dir_volume_name(&instance_group.name))
        .namespace(namespace)
        .storage_mib(instance_group.ephemeral_disk_size())
        .storage_class(instance_group.persistent_disk_type.as_deref())
        .build()
}
