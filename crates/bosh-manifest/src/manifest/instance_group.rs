use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, EnvVar, Probe, SecurityContext, Toleration};
use serde::{Deserialize, Serialize};

use super::is_default;

/// A named, horizontally scaled group of co-located jobs.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct InstanceGroup {
    pub name: String,

    #[serde(default)]
    pub instances: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub azs: Vec<String>,

    #[serde(default)]
    pub jobs: Vec<Job>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_resources: Option<VmResources>,

    /// Alias of an entry in the manifest's `stemcells`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stemcell: Option<String>,

    /// Persistent disk size in MiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_disk: Option<i32>,

    /// Used as the storage class of persistent volume claims.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_disk_type: Option<String>,

    #[serde(default, skip_serializing_if = "is_default")]
    pub lifecycle: Lifecycle,

    #[serde(default, skip_serializing_if = "is_default")]
    pub env: AgentEnv,

    #[serde(default, skip_serializing_if = "is_default")]
    pub properties: InstanceGroupProperties,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl InstanceGroup {
    pub fn agent_settings(&self) -> &AgentSettings {
        &self.env.bosh.agent.settings
    }

    /// Size of the ephemeral disk claim in MiB, when the agent settings ask for one.
    ///
    /// Uses the VM's ephemeral disk size if set, then the persistent disk size, then 10 GiB.
    pub fn ephemeral_disk_size(&self) -> i32 {
        const DEFAULT_EPHEMERAL_DISK_SIZE: i32 = 10240;

        self.vm_resources
            .as_ref()
            .map(|vm| vm.ephemeral_disk_size)
            .filter(|size| *size > 0)
            .or_else(|| self.persistent_disk.filter(|size| *size > 0))
            .unwrap_or(DEFAULT_EPHEMERAL_DISK_SIZE)
    }

    /// Names of the releases used by the jobs, in order of first use.
    pub fn releases(&self) -> Vec<&str> {
        let mut releases: Vec<&str> = Vec::new();
        for job in &self.jobs {
            if !releases.contains(&job.release.as_str()) {
                releases.push(&job.release);
            }
        }
        releases
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Lifecycle {
    #[default]
    Service,
    Errand,
    AutoErrand,
}

impl Lifecycle {
    pub fn is_errand(self) -> bool {
        matches!(self, Self::Errand | Self::AutoErrand)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct VmResources {
    #[serde(default)]
    pub cpu: i32,

    /// RAM in MiB.
    #[serde(default)]
    pub ram: i32,

    /// Ephemeral disk size in MiB.
    #[serde(default)]
    pub ephemeral_disk_size: i32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct AgentEnv {
    #[serde(default, skip_serializing_if = "is_default")]
    pub bosh: BoshEnv,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BoshEnv {
    #[serde(default, skip_serializing_if = "is_default")]
    pub agent: Agent,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Agent {
    #[serde(default, skip_serializing_if = "is_default")]
    pub settings: AgentSettings,
}

/// Kubernetes specific settings of the pods of an instance group.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Back the ephemeral data directory with a persistent volume claim instead of an emptyDir.
    #[serde(default, rename = "ephemeralAsPVC", skip_serializing_if = "is_default")]
    pub ephemeral_as_pvc: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct InstanceGroupProperties {
    #[serde(default, skip_serializing_if = "is_default")]
    pub quarks: InstanceGroupQuarks,

    #[serde(flatten)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct InstanceGroupQuarks {
    /// Service which must be reachable before the instance group's jobs start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_service: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Job {
    pub name: String,

    pub release: String,

    #[serde(default, skip_serializing_if = "is_default")]
    pub properties: JobProperties,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub consumes: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provides: BTreeMap<String, serde_json::Value>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct JobProperties {
    #[serde(default, skip_serializing_if = "is_default")]
    pub quarks: JobQuarks,

    /// Release specific properties, passed on to template rendering untouched.
    #[serde(flatten)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// The containerization block of a job.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct JobQuarks {
    /// Resolved links, filled in during data gathering.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub consumes: BTreeMap<String, serde_json::Value>,

    /// Per-instance addressing data used to render spec files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<JobInstance>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,

    #[serde(default, skip_serializing_if = "is_default")]
    pub run: RunConfig,

    /// Additional environment for all containers of the job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<EnvVar>,

    /// Keep failed pre-start containers alive for inspection.
    #[serde(default, skip_serializing_if = "is_default")]
    pub debug: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct JobInstance {
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub az: String,

    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub index: i32,

    #[serde(default)]
    pub instance: i32,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub bootstrap: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Port {
    pub name: String,

    #[serde(default = "Port::default_protocol")]
    pub protocol: String,

    pub internal: i32,
}

impl Port {
    fn default_protocol() -> String {
        "TCP".to_owned()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RunConfig {
    /// Health checks keyed by BPM process name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub healthcheck: BTreeMap<String, HealthCheck>,

    /// Security context of the job's pre-start containers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct HealthCheck {
    #[serde(default, rename = "readiness", skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    #[serde(default, rename = "liveness", skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    fn instance_group(input: &str) -> InstanceGroup {
        serde_yaml::from_str(input).expect("instance group must parse")
    }

    #[rstest]
    #[case("name: a\n", 10240)]
    #[case("name: a\npersistent_disk: 2048\n", 2048)]
    #[case("name: a\npersistent_disk: 2048\nvm_resources: {ephemeral_disk_size: 4096}\n", 4096)]
    #[case("name: a\nvm_resources: {ephemeral_disk_size: 0}\n", 10240)]
    fn ephemeral_disk_size(#[case] input: &str, #[case] expected: i32) {
        assert_eq!(instance_group(input).ephemeral_disk_size(), expected);
    }

    #[test]
    fn parses_agent_settings_and_health_checks() {
        let ig = instance_group(indoc! {"
            name: nats
            lifecycle: auto-errand
            env:
              bosh:
                agent:
                  settings:
                    ephemeralAsPVC: true
                    labels:
                      app: nats
            properties:
              quarks:
                required_service: database
            jobs:
            - name: nats
              release: nats
              properties:
                quarks:
                  run:
                    healthcheck:
                      nats:
                        readiness:
                          exec:
                            command: [curl, localhost:8222]
        "});
        assert!(ig.lifecycle.is_errand());
        assert!(ig.agent_settings().ephemeral_as_pvc);
        assert_eq!(ig.agent_settings().labels["app"], "nats");
        assert_eq!(
            ig.properties.quarks.required_service.as_deref(),
            Some("database")
        );
        let check = &ig.jobs[0].properties.quarks.run.healthcheck["nats"];
        assert!(check.readiness_probe.is_some());
        assert!(check.liveness_probe.is_none());
    }

    #[test]
    fn releases_in_order_of_first_use() {
        let ig = instance_group(indoc! {"
            name: api
            jobs:
            - {name: a, release: capi}
            - {name: b, release: routing}
            - {name: c, release: capi}
        "});
        assert_eq!(ig.releases(), vec!["capi", "routing"]);
    }
}
