use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::JobTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A job run by the job runner, which persists the JSON its containers write as secrets.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "quarks.cloudfoundry.org",
    version = "v1alpha1",
    kind = "QuarksJob",
    shortname = "qjob",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct QuarksJobSpec {
    pub trigger: Trigger,

    pub template: JobTemplateSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Output>,

    /// Re-run the job when a mounted config map or secret changes.
    #[serde(default)]
    pub update_on_config_change: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct Trigger {
    pub strategy: Strategy,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Run as soon as the job is created.
    Now,
    /// Run once, the first time the job is created.
    Once,
    /// Only run when triggered by a user.
    #[default]
    Manual,
    /// Set by the job runner after the job ran.
    Done,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    /// Output files per container, mapped to the secret they are persisted in.
    #[serde(default)]
    pub output_map: BTreeMap<String, BTreeMap<String, SecretOptions>>,

    #[serde(default = "Output::default_output_type")]
    pub output_type: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secret_labels: BTreeMap<String, String>,
}

impl Output {
    fn default_output_type() -> String {
        "json".to_owned()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretOptions {
    pub name: String,

    /// Persist the output as a new version of a versioned secret.
    #[serde(default)]
    pub versioned: bool,
}
