//! BPM, the per-job process configuration of BOSH releases.
//!
//! A job's `bpm.yml` template is rendered during data gathering. The result for all jobs of an
//! instance group is stored as [`BpmInfo`] under the `bpm.yaml` key of a versioned secret.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::manifest::{AgentEnv, Variable, is_default};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse BPM information"))]
    ParseBpmInfo { source: serde_yaml::Error },

    #[snafu(display("failed to serialize BPM information"))]
    SerializeBpmInfo { source: serde_yaml::Error },
}

/// BPM configs keyed by job name.
pub type Configs = BTreeMap<String, Config>;

/// The BPM configuration of one job.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub processes: Vec<Process>,

    #[serde(default, skip_serializing_if = "is_default")]
    pub unsupported_template: bool,

    /// Whether the job ships a BOSH `pre-start` script. The BPM data gathering job sets it from
    /// the job's templates, a missing key means no `bosh-pre-start-<job>` init container.
    #[serde(default, skip_serializing_if = "is_default")]
    pub pre_start_script: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Process {
    pub name: String,

    pub executable: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,

    #[serde(default, skip_serializing_if = "is_default")]
    pub hooks: Hooks,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,

    #[serde(default, skip_serializing_if = "is_default")]
    pub limits: Limits,

    /// Resource requests as Kubernetes quantities, e.g. `memory: 128Mi`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_disk: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_disk: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_volumes: Vec<Volume>,

    #[serde(default, rename = "unsafe", skip_serializing_if = "is_default")]
    pub unsafe_: Unsafe,
}

impl Process {
    pub fn uses_ephemeral_disk(&self) -> bool {
        self.ephemeral_disk.unwrap_or_default()
    }

    pub fn uses_persistent_disk(&self) -> bool {
        self.persistent_disk.unwrap_or_default()
    }

    pub fn pre_start_hook(&self) -> Option<&str> {
        self.hooks.pre_start.as_deref().filter(|hook| !hook.is_empty())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Hooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_start: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Limits {
    /// Memory limit as a Kubernetes quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_files: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processes: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Volume {
    pub path: String,

    #[serde(default, skip_serializing_if = "is_default")]
    pub writable: bool,

    #[serde(default, skip_serializing_if = "is_default")]
    pub allow_executions: bool,

    #[serde(default, skip_serializing_if = "is_default")]
    pub mount_only: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Unsafe {
    #[serde(default, skip_serializing_if = "is_default")]
    pub privileged: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unrestricted_volumes: Vec<Volume>,
}

/// Everything the BPM reconciler needs to build the workload of one instance group.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BpmInfo {
    pub instance_group: BpmInstanceGroup,

    #[serde(default)]
    pub configs: Configs,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BpmInstanceGroup {
    pub name: String,

    #[serde(default)]
    pub instances: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub azs: Vec<String>,

    #[serde(default, skip_serializing_if = "is_default")]
    pub env: AgentEnv,
}

impl BpmInfo {
    pub fn from_yaml(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).context(ParseBpmInfoSnafu)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context(SerializeBpmInfoSnafu)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn parses_bpm_info() {
        let info = BpmInfo::from_yaml(indoc! {r#"
            instance_group:
              name: nats
              instances: 2
              azs: [z1]
            configs:
              nats:
                pre_start_script: true
                processes:
                - name: nats
                  executable: /var/vcap/packages/gnatsd/bin/gnatsd
                  args: [-c, /var/vcap/jobs/nats/config/nats.conf]
                  env:
                    FOO: bar
                  hooks:
                    pre_start: /var/vcap/jobs/nats/bin/bpm-pre-start
                  capabilities: [NET_BIND_SERVICE]
                  limits:
                    memory: 1G
                    open_files: 100000
                  ephemeral_disk: true
                  additional_volumes:
                  - path: /var/vcap/store/nats
                    writable: true
                  unsafe:
                    privileged: true
                    unrestricted_volumes:
                    - path: /dev/log
        "#})
        .expect("BPM info must parse");

        assert_eq!(info.instance_group.instances, 2);
        let config = &info.configs["nats"];
        assert!(config.pre_start_script);
        let process = &config.processes[0];
        assert_eq!(
            process.pre_start_hook(),
            Some("/var/vcap/jobs/nats/bin/bpm-pre-start")
        );
        assert!(process.uses_ephemeral_disk());
        assert!(!process.uses_persistent_disk());
        assert!(process.additional_volumes[0].writable);
        assert!(process.unsafe_.privileged);
        assert_eq!(process.unsafe_.unrestricted_volumes[0].path, "/dev/log");
        assert_eq!(process.limits.open_files, Some(100_000));
    }

    #[test]
    fn empty_hook_is_no_hook() {
        let process = Process {
            name: "p".into(),
            executable: "/bin/p".into(),
            hooks: Hooks {
                pre_start: Some(String::new()),
            },
            ..Process::default()
        };
        assert_eq!(process.pre_start_hook(), None);
    }
}
