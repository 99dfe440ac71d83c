use k8s_openapi::{
    api::core::v1::{
        EmptyDirVolumeSource, PersistentVolumeClaim, PersistentVolumeClaimSpec,
        PersistentVolumeClaimVolumeSource, SecretVolumeSource, Volume, VolumeMount,
        VolumeResourceRequirements,
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::ObjectMeta},
};

/// Medium of emptyDir volumes backed by the node's memory.
pub const MEMORY_MEDIUM: &str = "Memory";

/// A builder to build [`Volume`] objects. May only contain one `volume_source`
/// at a time. E.g. a call like `with_secret` after `with_empty_dir` will overwrite the
/// `empty_dir`.
#[derive(Clone, Default)]
pub struct VolumeBuilder {
    name: String,
    volume_source: VolumeSource,
}

#[derive(Clone)]
pub enum VolumeSource {
    EmptyDir(EmptyDirVolumeSource),
    PersistentVolumeClaim(PersistentVolumeClaimVolumeSource),
    Secret(SecretVolumeSource),
}

impl Default for VolumeSource {
    fn default() -> Self {
        Self::EmptyDir(EmptyDirVolumeSource::default())
    }
}

impl VolumeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_empty_dir(
        &mut self,
        medium: Option<impl Into<String>>,
        quantity: Option<Quantity>,
    ) -> &mut Self {
        self.volume_source = VolumeSource::EmptyDir(EmptyDirVolumeSource {
            medium: medium.map(Into::into),
            size_limit: quantity,
        });
        self
    }

    pub fn with_persistent_volume_claim(
        &mut self,
        claim_name: impl Into<String>,
        read_only: bool,
    ) -> &mut Self {
        self.volume_source =
            VolumeSource::PersistentVolumeClaim(PersistentVolumeClaimVolumeSource {
                claim_name: claim_name.into(),
                read_only: Some(read_only),
            });
        self
    }

    pub fn with_secret(&mut self, secret_name: impl Into<String>, optional: bool) -> &mut Self {
        self.volume_source = VolumeSource::Secret(SecretVolumeSource {
            optional: Some(optional),
            secret_name: Some(secret_name.into()),
            ..SecretVolumeSource::default()
        });
        self
    }

    pub fn build(&self) -> Volume {
        let name = self.name.clone();
        match &self.volume_source {
            VolumeSource::EmptyDir(empty_dir) => Volume {
                name,
                empty_dir: Some(empty_dir.clone()),
                ..Volume::default()
            },
            VolumeSource::PersistentVolumeClaim(pvc) => Volume {
                name,
                persistent_volume_claim: Some(pvc.clone()),
                ..Volume::default()
            },
            VolumeSource::Secret(secret) => Volume {
                name,
                secret: Some(secret.clone()),
                ..Volume::default()
            },
        }
    }
}

/// A builder to build [`VolumeMount`] objects.
#[derive(Clone, Default)]
pub struct VolumeMountBuilder {
    mount_path: String,
    name: String,
    read_only: Option<bool>,
    sub_path: Option<String>,
}

impl VolumeMountBuilder {
    pub fn new(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            mount_path: mount_path.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn read_only(&mut self, read_only: bool) -> &mut Self {
        self.read_only = Some(read_only);
        self
    }

    /// Empty sub paths mount the whole volume and are dropped.
    pub fn sub_path(&mut self, sub_path: impl Into<String>) -> &mut Self {
        let sub_path = sub_path.into();
        self.sub_path = (!sub_path.is_empty()).then_some(sub_path);
        self
    }

    pub fn build(&self) -> VolumeMount {
        VolumeMount {
            mount_path: self.mount_path.clone(),
            name: self.name.clone(),
            read_only: self.read_only,
            sub_path: self.sub_path.clone(),
            ..VolumeMount::default()
        }
    }
}

/// A builder for the [`PersistentVolumeClaim`] templates of stateful workloads.
#[derive(Clone, Default)]
pub struct PersistentVolumeClaimBuilder {
    name: String,
    namespace: Option<String>,
    storage: Option<Quantity>,
    storage_class: Option<String>,
}

impl PersistentVolumeClaimBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn namespace(&mut self, namespace: impl Into<String>) -> &mut Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Requested size in MiB.
    pub fn storage_mib(&mut self, size: i32) -> &mut Self {
        self.storage = Some(Quantity(format!("{size}Mi")));
        self
    }

    pub fn storage_class(&mut self, storage_class: Option<impl Into<String>>) -> &mut Self {
        self.storage_class = storage_class.map(Into::into);
        self
    }

    pub fn build(&self) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: self.namespace.clone(),
                ..ObjectMeta::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
                storage_class_name: self.storage_class.clone(),
                resources: self.storage.clone().map(|storage| VolumeResourceRequirements {
                    requests: Some([("storage".to_owned(), storage)].into()),
                    ..VolumeResourceRequirements::default()
                }),
                ..PersistentVolumeClaimSpec::default()
            }),
            ..PersistentVolumeClaim::default()
        }
    }
}
