use std::time::Duration;

pub const DEFAULT_OPERATOR_IMAGE: &str = "ghcr.io/cloudfoundry-incubator/quarks-operator:latest";
pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";

/// The image helper containers and jobs run with, usually the operator's own image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorImage {
    pub image: String,
    pub pull_policy: String,
}

/// Runtime configuration shared by all controllers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Only resources in this namespace are watched, all namespaces when unset.
    pub watch_namespace: Option<String>,

    pub operator_image: OperatorImage,

    /// Deadline for a single reconcile run.
    pub ctx_timeout: Duration,

    /// Objects reconciled within this window are not reconciled again.
    pub meltdown_duration: Duration,

    /// When to look at an object again which is in meltdown.
    pub meltdown_requeue_after: Duration,

    /// Number of objects each controller reconciles concurrently.
    pub max_workers: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            operator_image: OperatorImage {
                image: DEFAULT_OPERATOR_IMAGE.to_owned(),
                pull_policy: DEFAULT_PULL_POLICY.to_owned(),
            },
            ctx_timeout: Duration::from_secs(300),
            meltdown_duration: Duration::from_secs(60),
            meltdown_requeue_after: Duration::from_secs(30),
            max_workers: 1,
        }
    }
}
