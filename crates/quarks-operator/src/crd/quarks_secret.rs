use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Asks the secret generator to create a secret, e.g. a password or a certificate.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "quarks.cloudfoundry.org",
    version = "v1alpha1",
    kind = "QuarksSecret",
    shortname = "qsec",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct QuarksSecretSpec {
    /// One of `password`, `certificate`, `rsa` or `ssh`.
    #[serde(rename = "type")]
    pub secret_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,

    /// Name of the generated secret.
    pub secret_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateRequest>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_names: Vec<String>,

    #[serde(default, rename = "isCA")]
    pub is_ca: bool,

    /// The secret holding the signing CA certificate.
    #[serde(default, rename = "CARef", skip_serializing_if = "Option::is_none")]
    pub ca_ref: Option<SecretReference>,

    /// The secret holding the signing CA key.
    #[serde(default, rename = "CAKeyRef", skip_serializing_if = "Option::is_none")]
    pub ca_key_ref: Option<SecretReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_type: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct SecretReference {
    pub name: String,
    pub key: String,
}
