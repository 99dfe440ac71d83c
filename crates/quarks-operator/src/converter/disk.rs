use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Volume, VolumeMount};

/// Which BOSH disk a [`Disk`] backs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskKind {
    Ephemeral,
    Persistent,
}

/// Tags used to select the disks of a job or process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiskTags {
    pub job: Option<String>,
    pub process: Option<String>,
    pub kind: Option<DiskKind>,
}

impl DiskTags {
    pub fn job_process(job: &str, process: &str) -> Self {
        Self {
            job: Some(job.to_owned()),
            process: Some(process.to_owned()),
            kind: None,
        }
    }

    pub fn job_kind(job: &str, kind: DiskKind) -> Self {
        Self {
            job: Some(job.to_owned()),
            process: None,
            kind: Some(kind),
        }
    }
}

/// A volume, its mount and an optional claim. Each part is optional, e.g. a secret volume
/// mounted only by some containers comes without a mount.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Disk {
    pub volume: Option<Volume>,
    pub volume_mount: Option<VolumeMount>,
    pub persistent_volume_claim: Option<PersistentVolumeClaim>,
    pub tags: DiskTags,
}

#[derive(Clone, Copy, Debug)]
pub enum DiskSelector<'a> {
    Job(&'a str),
    Process(&'a str),
    Kind(DiskKind),
}

impl DiskSelector<'_> {
    fn matches(self, tags: &DiskTags) -> bool {
        match self {
            Self::Job(job) => tags.job.as_deref() == Some(job),
            Self::Process(process) => tags.process.as_deref() == Some(process),
            Self::Kind(kind) => tags.kind == Some(kind),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Disks(Vec<Disk>);

impl Disks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, disk: Disk) {
        self.0.push(disk);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Disk> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The disks whose tags match `selector`.
    pub fn filter(&self, selector: DiskSelector<'_>) -> Self {
        self.iter()
            .filter(|disk| selector.matches(&disk.tags))
            .cloned()
            .collect()
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.iter().filter_map(|d| d.volume.clone()).collect()
    }

    pub fn volume_mounts(&self) -> Vec<VolumeMount> {
        self.iter().filter_map(|d| d.volume_mount.clone()).collect()
    }

    pub fn persistent_volume_claims(&self) -> Vec<PersistentVolumeClaim> {
        self.iter()
            .filter_map(|d| d.persistent_volume_claim.clone())
            .collect()
    }
}

impl FromIterator<Disk> for Disks {
    fn from_iter<T: IntoIterator<Item = Disk>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Disk> for Disks {
    fn extend<T: IntoIterator<Item = Disk>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl<'a> IntoIterator for &'a Disks {
    type IntoIter = std::slice::Iter<'a, Disk>;
    type Item = &'a Disk;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for Disks {
    type IntoIter = std::vec::IntoIter<Disk>;
    type Item = Disk;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount_disk(name: &str, tags: DiskTags) -> Disk {
        Disk {
            volume_mount: Some(VolumeMount {
                name: name.to_owned(),
                mount_path: format!("/{name}"),
                ..VolumeMount::default()
            }),
            tags,
            ..Disk::default()
        }
    }

    #[test]
    fn filters_by_tags() {
        let disks: Disks = [
            mount_disk("a", DiskTags::job_process("nats", "nats")),
            mount_disk("b", DiskTags::job_kind("nats", DiskKind::Ephemeral)),
            mount_disk("c", DiskTags::job_kind("router", DiskKind::Persistent)),
            mount_disk("d", DiskTags::default()),
        ]
        .into_iter()
        .collect();

        let names = |disks: Disks| -> Vec<String> {
            disks.volume_mounts().into_iter().map(|m| m.name).collect()
        };

        assert_eq!(names(disks.filter(DiskSelector::Job("nats"))), vec!["a", "b"]);
        assert_eq!(names(disks.filter(DiskSelector::Process("nats"))), vec!["a"]);
        assert_eq!(
            names(disks.filter(DiskSelector::Kind(DiskKind::Persistent))),
            vec!["c"]
        );
        assert!(disks.filter(DiskSelector::Job("missing")).is_empty());
        assert!(disks.volumes().is_empty());
    }
}
