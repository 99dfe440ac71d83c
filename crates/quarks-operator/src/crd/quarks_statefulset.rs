use k8s_openapi::api::apps::v1::StatefulSet;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The desired stateful workload of an instance group. The lifecycle controller turns it into one
/// versioned stateful set per availability zone.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "quarks.cloudfoundry.org",
    version = "v1alpha1",
    kind = "QuarksStatefulSet",
    shortname = "qsts",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct QuarksStatefulSetSpec {
    pub template: StatefulSet,

    /// Roll the pods when a mounted config map or secret changes.
    #[serde(default)]
    pub update_on_config_change: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
}
