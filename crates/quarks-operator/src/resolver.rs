//! Resolves the manifest of a [`BoshDeployment`]: fetches the base manifest and the ops files,
//! applies the ops in order and interpolates the implicit variables.
use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bosh_manifest::{
    Manifest,
    interpolate::{self, Interpolator, Variables},
    manifest,
    names,
    patch::{self, Ops, PatchOptions},
};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
#[cfg(test)]
use mockall::automock;
use serde_yaml::Value;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{debug, instrument};

use crate::crd::{BoshDeployment, ReferenceType, ResourceReference};

const MANIFEST_KEY: &str = "manifest";
const OPS_KEY: &str = "ops";
const IMPLICIT_VARIABLE_KEY: &str = "value";

type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors of a [`SourceFetcher`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FetchError {
    #[snafu(display("{kind} {name:?} not found"))]
    NotFound { kind: ReferenceType, name: String },

    #[snafu(display("failed to get {kind} {name:?}"))]
    Get {
        source: kube::Error,
        kind: ReferenceType,
        name: String,
    },

    #[snafu(display("key {key:?} of secret {name:?} is not valid UTF-8"))]
    InvalidUtf8 {
        source: std::string::FromUtf8Error,
        name: String,
        key: String,
    },

    #[snafu(display("failed to GET {url:?}"))]
    HttpRequest { source: reqwest::Error, url: String },

    #[snafu(display("GET {url:?} returned status {status}"))]
    HttpStatus { url: String, status: u16 },
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unrecognized manifest ref type {ref_type:?}"))]
    UnrecognizedManifestRefType { ref_type: String },

    #[snafu(display("unrecognized ops ref type {ref_type:?}"))]
    UnrecognizedOpsRefType { ref_type: String },

    #[snafu(display("failed to retrieve manifest from {kind} {name:?}"))]
    FetchManifest {
        source: FetchError,
        kind: ReferenceType,
        name: String,
    },

    #[snafu(display("failed to retrieve ops from {kind} {name:?}"))]
    FetchOps {
        source: FetchError,
        kind: ReferenceType,
        name: String,
    },

    #[snafu(display("{kind} {name:?} doesn't contain key manifest"))]
    MissingManifestKey { kind: ReferenceType, name: String },

    #[snafu(display("{kind} {name:?} doesn't contain key ops"))]
    MissingOpsKey { kind: ReferenceType, name: String },

    #[snafu(display("invalid YAML in manifest {name:?}"))]
    ParseManifestYaml {
        source: serde_yaml::Error,
        name: String,
    },

    #[snafu(display("invalid ops {name:?}"))]
    ParseOps { source: patch::Error, name: String },

    #[snafu(display("failed to apply ops {name:?}"))]
    ApplyOps { source: patch::Error, name: String },

    #[snafu(display("failed to retrieve implicit variable from secret {secret:?}"))]
    FetchImplicitVariable { source: FetchError, secret: String },

    #[snafu(display("secret {secret:?} doesn't contain key value"))]
    MissingImplicitVariableValue { secret: String },

    #[snafu(display("failed to interpolate implicit variables of deployment {deployment:?}"))]
    InterpolateImplicitVariables {
        source: interpolate::Error,
        deployment: String,
    },

    #[snafu(display("failed to parse the resolved manifest of deployment {deployment:?}"))]
    ParseResolvedManifest {
        source: serde_yaml::Error,
        deployment: String,
    },

    #[snafu(display("the resolved manifest of deployment {deployment:?} is invalid"))]
    InvalidManifest {
        source: manifest::Error,
        deployment: String,
    },
}

/// Reads the documents a deployment refers to.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, FetchError>;

    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, FetchError>;

    async fn url_content(&self, url: &str) -> Result<String, FetchError>;
}

/// A manifest with all ops applied and all implicit variables interpolated.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedManifest {
    pub manifest: Manifest,

    /// Names of the secrets the implicit variables were read from.
    pub implicit_variables: Vec<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestResolver: Send + Sync {
    async fn resolve_manifest(
        &self,
        deployment: &BoshDeployment,
        namespace: &str,
    ) -> Result<ResolvedManifest>;
}

/// Resolves manifests with the documents read by a [`SourceFetcher`].
pub struct Resolver {
    fetcher: Arc<dyn SourceFetcher>,
}

impl Resolver {
    pub fn new(fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self { fetcher }
    }

    /// The content of `key` in the referenced config map or secret, or the body of the URL.
    async fn fetch(
        &self,
        namespace: &str,
        kind: ReferenceType,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, FetchError> {
        let mut data = match kind {
            ReferenceType::ConfigMap => self.fetcher.config_map_data(namespace, name).await?,
            ReferenceType::Secret => self.fetcher.secret_data(namespace, name).await?,
            ReferenceType::Url => return self.fetcher.url_content(name).await.map(Some),
        };
        Ok(data.remove(key))
    }

    async fn base_manifest(&self, reference: &ResourceReference, namespace: &str) -> Result<Value> {
        let kind = reference
            .reference_type()
            .context(UnrecognizedManifestRefTypeSnafu {
                ref_type: &reference.type_,
            })?;
        let name = reference.name.as_str();

        let content = self
            .fetch(namespace, kind, name, MANIFEST_KEY)
            .await
            .context(FetchManifestSnafu { kind, name })?
            .context(MissingManifestKeySnafu { kind, name })?;
        serde_yaml::from_str(&content).context(ParseManifestYamlSnafu { name })
    }

    async fn ops(&self, reference: &ResourceReference, namespace: &str) -> Result<Ops> {
        let kind = reference
            .reference_type()
            .context(UnrecognizedOpsRefTypeSnafu {
                ref_type: &reference.type_,
            })?;
        let name = reference.name.as_str();

        let content = self
            .fetch(namespace, kind, name, OPS_KEY)
            .await
            .context(FetchOpsSnafu { kind, name })?
            .context(MissingOpsKeySnafu { kind, name })?;
        Ops::from_yaml(&content).context(ParseOpsSnafu { name })
    }

    /// Values of the placeholders which are not declared as manifest variables. They are read
    /// from the `value` key of `<deployment>.var-<name>`.
    async fn implicit_variables(
        &self,
        doc: &Value,
        deployment: &str,
        namespace: &str,
    ) -> Result<(Variables, Vec<String>)> {
        let declared = declared_variables(doc);
        let mut variables = Variables::new();
        let mut secrets = Vec::new();

        for name in interpolate::placeholders(doc) {
            if declared.contains(&name) {
                continue;
            }
            let secret = names::implicit_variable_secret_name(deployment, &name);
            let mut data = self
                .fetcher
                .secret_data(namespace, &secret)
                .await
                .context(FetchImplicitVariableSnafu { secret: &secret })?;
            let value = data
                .remove(IMPLICIT_VARIABLE_KEY)
                .context(MissingImplicitVariableValueSnafu { secret: &secret })?;
            variables.insert(name, value);
            secrets.push(secret);
        }

        Ok((variables, secrets))
    }
}

#[async_trait]
impl ManifestResolver for Resolver {
    #[instrument(skip(self, deployment), fields(deployment = %deployment_name(deployment)))]
    async fn resolve_manifest(
        &self,
        deployment: &BoshDeployment,
        namespace: &str,
    ) -> Result<ResolvedManifest> {
        let deployment_name = deployment_name(deployment);
        let mut doc = self.base_manifest(&deployment.spec.manifest, namespace).await?;

        for reference in &deployment.spec.ops {
            let ops = self.ops(reference, namespace).await?;
            ops.apply(&mut doc, &PatchOptions::default())
                .context(ApplyOpsSnafu {
                    name: &reference.name,
                })?;
        }

        let (variables, implicit_variables) = self
            .implicit_variables(&doc, &deployment_name, namespace)
            .await?;
        if !variables.is_empty() {
            doc = Interpolator::new(false)
                .interpolate(&doc, &[&variables])
                .context(InterpolateImplicitVariablesSnafu {
                    deployment: &deployment_name,
                })?;
        }

        let mut manifest: Manifest =
            serde_yaml::from_value(doc).context(ParseResolvedManifestSnafu {
                deployment: &deployment_name,
            })?;
        manifest.name.clone_from(&deployment_name);
        manifest.validate().context(InvalidManifestSnafu {
            deployment: &deployment_name,
        })?;

        debug!(
            ops = deployment.spec.ops.len(),
            implicit_variables = implicit_variables.len(),
            "resolved manifest"
        );
        Ok(ResolvedManifest {
            manifest,
            implicit_variables,
        })
    }
}

fn deployment_name(deployment: &BoshDeployment) -> String {
    deployment.metadata.name.clone().unwrap_or_default()
}

/// Names in the document's `variables` list.
fn declared_variables(doc: &Value) -> Vec<String> {
    doc.get("variables")
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
        .filter_map(|variable| variable.get("name").and_then(Value::as_str))
        .map(str::to_owned)
        .collect()
}

/// Fetches config maps and secrets from the cluster and URLs with an HTTP GET.
pub struct KubeSourceFetcher {
    client: kube::Client,
    http: reqwest::Client,
}

impl KubeSourceFetcher {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SourceFetcher for KubeSourceFetcher {
    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, FetchError> {
        let kind = ReferenceType::ConfigMap;
        let config_map = kube::Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .context(GetSnafu { kind, name })?
            .context(NotFoundSnafu { kind, name })?;
        Ok(config_map.data.unwrap_or_default())
    }

    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, FetchError> {
        let kind = ReferenceType::Secret;
        let secret = kube::Api::<Secret>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .context(GetSnafu { kind, name })?
            .context(NotFoundSnafu { kind, name })?;
        decode_secret_data(name, secret)
    }

    async fn url_content(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context(HttpRequestSnafu { url })?;
        let status = response.status();
        snafu::ensure!(
            status.is_success(),
            HttpStatusSnafu {
                url,
                status: status.as_u16()
            }
        );
        response.text().await.context(HttpRequestSnafu { url })
    }
}

/// Secret data as strings. `stringData` is only set on objects which were never persisted, but
/// is merged for completeness.
pub(crate) fn decode_secret_data(
    name: &str,
    secret: Secret,
) -> Result<BTreeMap<String, String>, FetchError> {
    let mut data = secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let decoded =
                String::from_utf8(value.0).context(InvalidUtf8Snafu { name, key: &key })?;
            Ok((key, decoded))
        })
        .collect::<Result<BTreeMap<_, _>, FetchError>>()?;
    data.extend(secret.string_data.unwrap_or_default());
    Ok(data)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use k8s_openapi::ByteString;
    use mockall::predicate::eq;

    use super::*;
    use crate::crd::BoshDeploymentSpec;

    const BASE: &str = indoc! {"
        name: nats-manifest
        releases:
        - {name: nats, version: 26}
        instance_groups:
        - name: nats
          instances: 2
          jobs:
          - name: nats
            release: nats
            properties:
              nats:
                password: ((nats_password))
                domain: ((system_domain))
        variables:
        - name: nats_password
          type: password
    "};

    const SCALE_OPS: &str = indoc! {"
        - type: replace
          path: /instance_groups/name=nats/instances
          value: 3
    "};

    fn reference(type_: &str, name: &str) -> ResourceReference {
        ResourceReference {
            name: name.to_owned(),
            type_: type_.to_owned(),
        }
    }

    fn deployment(manifest: ResourceReference, ops: Vec<ResourceReference>) -> BoshDeployment {
        BoshDeployment::new("nats-deployment", BoshDeploymentSpec { manifest, ops })
    }

    fn data(key: &str, value: &str) -> BTreeMap<String, String> {
        [(key.to_owned(), value.to_owned())].into()
    }

    fn fetcher_with_system_domain() -> MockSourceFetcher {
        let mut fetcher = MockSourceFetcher::new();
        fetcher
            .expect_secret_data()
            .with(eq("default"), eq("nats-deployment.var-system-domain"))
            .returning(|_, _| Ok(data("value", "example.com")));
        fetcher
    }

    #[tokio::test]
    async fn resolves_config_map_manifest_with_ops() {
        let mut fetcher = fetcher_with_system_domain();
        fetcher
            .expect_config_map_data()
            .with(eq("default"), eq("base"))
            .returning(|_, _| Ok(data("manifest", BASE)));
        fetcher
            .expect_url_content()
            .with(eq("https://example.com/scale.yml"))
            .returning(|_| Ok(SCALE_OPS.to_owned()));

        let resolver = Resolver::new(Arc::new(fetcher));
        let resolved = resolver
            .resolve_manifest(
                &deployment(
                    reference("configmap", "base"),
                    vec![reference("url", "https://example.com/scale.yml")],
                ),
                "default",
            )
            .await
            .expect("manifest must resolve");

        let manifest = resolved.manifest;
        assert_eq!(manifest.name, "nats-deployment");
        assert_eq!(manifest.instance_groups[0].instances, 3);
        assert_eq!(
            resolved.implicit_variables,
            vec!["nats-deployment.var-system-domain"]
        );

        let nats = &manifest.instance_groups[0].jobs[0].properties.properties["nats"];
        assert_eq!(nats["domain"], "example.com");
        assert_eq!(nats["password"], "((nats_password))");
    }

    #[tokio::test]
    async fn manifest_is_deterministic() {
        let mut fetcher = fetcher_with_system_domain();
        fetcher
            .expect_secret_data()
            .with(eq("default"), eq("base"))
            .returning(|_, _| Ok(data("manifest", BASE)));

        let resolver = Resolver::new(Arc::new(fetcher));
        let deployment = deployment(reference("secret", "base"), vec![]);
        let first = resolver
            .resolve_manifest(&deployment, "default")
            .await
            .expect("manifest must resolve");
        let second = resolver
            .resolve_manifest(&deployment, "default")
            .await
            .expect("manifest must resolve");

        assert_eq!(first, second);
        assert_eq!(
            first.manifest.sha1().expect("manifest must hash"),
            second.manifest.sha1().expect("manifest must hash")
        );
    }

    #[tokio::test]
    async fn reports_missing_sources() {
        let mut fetcher = MockSourceFetcher::new();
        fetcher.expect_config_map_data().returning(|_, name| {
            NotFoundSnafu {
                kind: ReferenceType::ConfigMap,
                name,
            }
            .fail()
        });

        let resolver = Resolver::new(Arc::new(fetcher));
        let error = resolver
            .resolve_manifest(&deployment(reference("configmap", "base"), vec![]), "default")
            .await
            .expect_err("missing config map must fail");

        assert!(
            error
                .to_string()
                .starts_with("failed to retrieve manifest from configmap")
        );
    }

    #[tokio::test]
    async fn reports_missing_keys() {
        let mut fetcher = MockSourceFetcher::new();
        fetcher
            .expect_config_map_data()
            .with(eq("default"), eq("base"))
            .returning(|_, _| Ok(BTreeMap::new()));
        fetcher
            .expect_secret_data()
            .with(eq("default"), eq("ops"))
            .returning(|_, _| Ok(data("manifest", BASE)));
        fetcher
            .expect_config_map_data()
            .with(eq("default"), eq("valid"))
            .returning(|_, _| Ok(data("manifest", BASE)));

        let resolver = Resolver::new(Arc::new(fetcher));
        let error = resolver
            .resolve_manifest(&deployment(reference("configmap", "base"), vec![]), "default")
            .await
            .expect_err("empty config map must fail");
        assert!(error.to_string().ends_with("doesn't contain key manifest"));

        let error = resolver
            .resolve_manifest(
                &deployment(
                    reference("configmap", "valid"),
                    vec![reference("secret", "ops")],
                ),
                "default",
            )
            .await
            .expect_err("ops without key must fail");
        assert!(error.to_string().ends_with("doesn't contain key ops"));
    }

    #[tokio::test]
    async fn rejects_unknown_reference_types() {
        let resolver = Resolver::new(Arc::new(MockSourceFetcher::new()));

        let error = resolver
            .resolve_manifest(&deployment(reference("bucket", "base"), vec![]), "default")
            .await
            .expect_err("unknown type must fail");
        assert!(matches!(
            error,
            Error::UnrecognizedManifestRefType { ref_type } if ref_type == "bucket"
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_ops_types() {
        let mut fetcher = fetcher_with_system_domain();
        fetcher
            .expect_config_map_data()
            .returning(|_, _| Ok(data("manifest", BASE)));

        let resolver = Resolver::new(Arc::new(fetcher));
        let error = resolver
            .resolve_manifest(
                &deployment(
                    reference("configmap", "base"),
                    vec![reference("bucket", "ops")],
                ),
                "default",
            )
            .await
            .expect_err("unknown ops type must fail");
        assert_eq!(error.to_string(), r#"unrecognized ops ref type "bucket""#);
    }

    #[tokio::test]
    async fn reports_invalid_yaml() {
        let mut fetcher = MockSourceFetcher::new();
        fetcher
            .expect_config_map_data()
            .returning(|_, _| Ok(data("manifest", "instance_groups: [")));

        let resolver = Resolver::new(Arc::new(fetcher));
        let error = resolver
            .resolve_manifest(&deployment(reference("configmap", "base"), vec![]), "default")
            .await
            .expect_err("invalid YAML must fail");
        assert_eq!(error.to_string(), r#"invalid YAML in manifest "base""#);
    }

    #[test]
    fn decodes_secret_data() {
        let secret = Secret {
            data: Some([("value".to_owned(), ByteString(b"example.com".to_vec()))].into()),
            ..Secret::default()
        };
        assert_eq!(
            decode_secret_data("var", secret).expect("data is valid UTF-8"),
            data("value", "example.com")
        );

        let secret = Secret {
            data: Some([("value".to_owned(), ByteString(vec![0xff]))].into()),
            ..Secret::default()
        };
        assert!(matches!(
            decode_secret_data("var", secret),
            Err(FetchError::InvalidUtf8 { key, .. }) if key == "value"
        ));
    }
}
