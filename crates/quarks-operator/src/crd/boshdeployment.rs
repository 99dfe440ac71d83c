use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A BOSH deployment, assembled from a base manifest and an ordered list of ops files.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "quarks.cloudfoundry.org",
    version = "v1alpha1",
    kind = "BOSHDeployment",
    root = "BoshDeployment",
    shortname = "bdpl",
    namespaced,
    status = "BoshDeploymentStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BoshDeploymentSpec {
    /// The base manifest.
    pub manifest: ResourceReference,

    /// Ops files, applied to the base manifest in order.
    #[serde(default)]
    pub ops: Vec<ResourceReference>,
}

/// Points to the source of a manifest or an ops file.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct ResourceReference {
    /// Name of the config map or secret, or the URL.
    pub name: String,

    /// One of `configmap`, `secret` or `url`.
    ///
    /// Kept as a plain string so that unknown types are reported while resolving instead of
    /// rejecting the whole resource.
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ReferenceType {
    ConfigMap,
    Secret,
    Url,
}

impl ResourceReference {
    /// The parsed source type, [`None`] if the type is not supported.
    pub fn reference_type(&self) -> Option<ReferenceType> {
        self.type_.parse().ok()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BoshDeploymentStatus {
    /// The last completed reconcile phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("configmap", Some(ReferenceType::ConfigMap))]
    #[case("secret", Some(ReferenceType::Secret))]
    #[case("url", Some(ReferenceType::Url))]
    #[case("git", None)]
    fn parses_reference_types(#[case] type_: &str, #[case] expected: Option<ReferenceType>) {
        let reference = ResourceReference {
            name: "manifest".to_owned(),
            type_: type_.to_owned(),
        };
        assert_eq!(reference.reference_type(), expected);
    }

    #[test]
    fn deserializes_spec() {
        let spec: BoshDeploymentSpec = serde_yaml::from_str(
            "manifest: {name: nats-manifest, type: configmap}\n\
             ops:\n\
             - {name: scale, type: secret}\n",
        )
        .expect("spec must parse");
        assert_eq!(spec.manifest.name, "nats-manifest");
        assert_eq!(spec.ops[0].reference_type(), Some(ReferenceType::Secret));
    }
}
