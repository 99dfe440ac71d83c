//! The typed BOSH deployment manifest.
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use sha1::{Digest, Sha1};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

mod instance_group;

pub use instance_group::*;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse manifest"))]
    ParseManifest { source: serde_yaml::Error },

    #[snafu(display("failed to serialize manifest"))]
    SerializeManifest { source: serde_yaml::Error },

    #[snafu(display("failed to serialize manifest for hashing"))]
    HashManifest { source: serde_json::Error },

    #[snafu(display("manifest {name:?} has no instance groups"))]
    NoInstanceGroups { name: String },

    #[snafu(display("manifest {name:?} declares instance group {instance_group:?} more than once"))]
    DuplicateInstanceGroup { name: String, instance_group: String },

    #[snafu(display("instance group {instance_group:?} not found"))]
    InstanceGroupNotFound { instance_group: String },

    #[snafu(display("job {job:?} not found in instance group {instance_group:?}"))]
    JobNotFound { job: String, instance_group: String },

    #[snafu(display("release {release:?} of job {job:?} not found"))]
    ReleaseNotFound { release: String, job: String },

    #[snafu(display("release {release:?} has no url"))]
    MissingReleaseUrl { release: String },

    #[snafu(display("no stemcell declared for release {release:?} or instance group {instance_group:?}"))]
    MissingStemcell {
        release: String,
        instance_group: String,
    },

    #[snafu(display("stemcell alias {alias:?} not found"))]
    StemcellNotFound { alias: String },
}

pub(crate) fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// Versions are often written as bare YAML numbers (`version: 26`), keep them as strings.
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        _ => Err(serde::de::Error::custom("expected a scalar")),
    }
}

/// A BOSH deployment manifest.
///
/// Keys without a typed counterpart are kept in `extra`, so serializing a parsed manifest does
/// not drop sections like `update` or `addons`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub releases: Vec<Release>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stemcells: Vec<Stemcell>,

    #[serde(default)]
    pub instance_groups: Vec<InstanceGroup>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Release {
    pub name: String,

    #[serde(default, deserialize_with = "scalar_string")]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stemcell: Option<ReleaseStemcell>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReleaseStemcell {
    pub os: String,

    #[serde(deserialize_with = "scalar_string")]
    pub version: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Stemcell {
    pub alias: String,

    #[serde(default)]
    pub os: String,

    #[serde(default, deserialize_with = "scalar_string")]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VariableType {
    Password,
    Certificate,
    Rsa,
    Ssh,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Variable {
    pub name: String,

    #[serde(rename = "type")]
    pub variable_type: VariableType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<VariableOptions>,
}

/// Generation options, only used for certificates.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct VariableOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_names: Vec<String>,

    #[serde(default, skip_serializing_if = "is_default")]
    pub is_ca: bool,

    /// Name of the variable holding the signing CA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extended_key_usage: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_type: Option<String>,
}

impl Manifest {
    pub fn from_yaml(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).context(ParseManifestSnafu)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context(SerializeManifestSnafu)
    }

    /// Hex encoded SHA-1 over a canonical JSON encoding with sorted map keys. The order of keys
    /// in the source document does not change the hash.
    pub fn sha1(&self) -> Result<String> {
        let value = serde_json::to_value(self).context(HashManifestSnafu)?;
        let bytes = serde_json::to_vec(&canonicalize(value)).context(HashManifestSnafu)?;
        Ok(hex::encode(Sha1::digest(&bytes)))
    }

    /// Checks that instance group names are unique and that there is at least one.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.instance_groups.is_empty(),
            NoInstanceGroupsSnafu { name: &self.name }
        );
        let mut seen = BTreeSet::new();
        for instance_group in &self.instance_groups {
            ensure!(
                seen.insert(instance_group.name.as_str()),
                DuplicateInstanceGroupSnafu {
                    name: &self.name,
                    instance_group: &instance_group.name,
                }
            );
        }
        Ok(())
    }

    pub fn instance_group(&self, name: &str) -> Option<&InstanceGroup> {
        self.instance_groups.iter().find(|ig| ig.name == name)
    }

    pub fn release(&self, name: &str) -> Option<&Release> {
        self.releases.iter().find(|release| release.name == name)
    }

    /// The container image of a job: `<release url>/<release>:<os>-<stemcell version>-<release
    /// version>`. The stemcell of the release wins over the stemcell of the instance group.
    pub fn release_image(&self, instance_group: &str, job: &str) -> Result<String> {
        let ig = self
            .instance_group(instance_group)
            .context(InstanceGroupNotFoundSnafu { instance_group })?;
        let job = ig
            .jobs
            .iter()
            .find(|j| j.name == job)
            .context(JobNotFoundSnafu {
                job,
                instance_group,
            })?;
        let release = self.release(&job.release).context(ReleaseNotFoundSnafu {
            release: &job.release,
            job: &job.name,
        })?;

        let (os, stemcell_version) = match &release.stemcell {
            Some(stemcell) => (stemcell.os.as_str(), stemcell.version.as_str()),
            None => {
                let alias = ig.stemcell.as_deref().context(MissingStemcellSnafu {
                    release: &release.name,
                    instance_group,
                })?;
                let stemcell = self
                    .stemcells
                    .iter()
                    .find(|s| s.alias == alias)
                    .context(StemcellNotFoundSnafu { alias })?;
                (stemcell.os.as_str(), stemcell.version.as_str())
            }
        };

        let url = release.url.as_deref().context(MissingReleaseUrlSnafu {
            release: &release.name,
        })?;
        Ok(format!(
            "{url}/{name}:{os}-{stemcell_version}-{version}",
            name = release.name,
            version = release.version
        ))
    }
}

fn canonicalize(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(canonicalize).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    const NATS: &str = indoc! {"
        name: nats-deployment
        releases:
        - name: nats
          version: 26
          url: docker.io/cfcontainerization
          stemcell:
            os: opensuse-42.3
            version: 36.g03b4653-30.80-7.0.0_316.gcf9fe4a7
        instance_groups:
        - name: nats
          instances: 2
          jobs:
          - name: nats
            release: nats
            properties:
              nats:
                user: admin
                password: ((nats_password))
              quarks:
                ports:
                - name: nats
                  protocol: TCP
                  internal: 4222
        variables:
        - name: nats_password
          type: password
    "};

    #[test]
    fn parses_manifest() {
        let manifest = Manifest::from_yaml(NATS).expect("manifest must parse");
        assert_eq!(manifest.name, "nats-deployment");
        assert_eq!(manifest.instance_groups[0].instances, 2);
        let job = &manifest.instance_groups[0].jobs[0];
        assert_eq!(job.properties.quarks.ports[0].internal, 4222);
        assert!(job.properties.properties.contains_key("nats"));
        assert_eq!(manifest.variables[0].variable_type, VariableType::Password);
    }

    #[test]
    fn keeps_unknown_sections() {
        let input = format!("{NATS}update:\n  canaries: 1\n");
        let manifest = Manifest::from_yaml(&input).expect("manifest must parse");
        let yaml = manifest.to_yaml().expect("manifest must serialize");
        let reparsed = Manifest::from_yaml(&yaml).expect("manifest must parse again");
        assert_eq!(reparsed.extra["update"]["canaries"], serde_json::json!(1));
        assert_eq!(reparsed, manifest);
    }

    #[test]
    fn hash_ignores_key_order() {
        let reordered = indoc! {"
            variables:
            - type: password
              name: nats_password
            instance_groups:
            - jobs:
              - properties:
                  quarks:
                    ports:
                    - internal: 4222
                      protocol: TCP
                      name: nats
                  nats:
                    password: ((nats_password))
                    user: admin
                release: nats
                name: nats
              instances: 2
              name: nats
            releases:
            - stemcell:
                version: 36.g03b4653-30.80-7.0.0_316.gcf9fe4a7
                os: opensuse-42.3
              url: docker.io/cfcontainerization
              version: 26
              name: nats
            name: nats-deployment
        "};
        let a = Manifest::from_yaml(NATS).expect("manifest must parse");
        let b = Manifest::from_yaml(reordered).expect("manifest must parse");
        assert_eq!(
            a.sha1().expect("hash must succeed"),
            b.sha1().expect("hash must succeed")
        );
    }

    #[test]
    fn hash_changes_with_values() {
        let a = Manifest::from_yaml(NATS).expect("manifest must parse");
        let mut b = a.clone();
        b.instance_groups[0].instances = 3;
        assert_ne!(
            a.sha1().expect("hash must succeed"),
            b.sha1().expect("hash must succeed")
        );
    }

    #[rstest]
    #[case::empty("name: empty\ninstance_groups: []\n")]
    #[case::duplicate("name: dup\ninstance_groups:\n- name: a\n- name: a\n")]
    fn invalid_manifests(#[case] input: &str) {
        let manifest = Manifest::from_yaml(input).expect("manifest must parse");
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn release_image_from_release_stemcell() {
        let manifest = Manifest::from_yaml(NATS).expect("manifest must parse");
        assert_eq!(
            manifest
                .release_image("nats", "nats")
                .expect("image must resolve"),
            "docker.io/cfcontainerization/nats:opensuse-42.3-36.g03b4653-30.80-7.0.0_316.gcf9fe4a7-26"
        );
    }

    #[test]
    fn release_image_from_instance_group_stemcell() {
        let manifest = Manifest::from_yaml(indoc! {"
            name: d
            releases:
            - {name: r, version: '1.0', url: registry.local}
            stemcells:
            - {alias: default, os: ubuntu-jammy, version: '1.1'}
            instance_groups:
            - name: ig
              stemcell: default
              jobs:
              - {name: j, release: r}
        "})
        .expect("manifest must parse");
        assert_eq!(
            manifest.release_image("ig", "j").expect("image must resolve"),
            "registry.local/r:ubuntu-jammy-1.1-1.0"
        );
        assert!(matches!(
            manifest.release_image("ig", "missing"),
            Err(Error::JobNotFound { .. })
        ));
    }
}
