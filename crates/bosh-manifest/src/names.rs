//! Deterministic Kubernetes object names derived from deployment, variable and instance group
//! names.
use std::sync::LazyLock;

use md5::{Digest, Md5};
use regex::Regex;

/// Maximum length of a RFC 1123 label, which most Kubernetes object names must satisfy.
pub const MAX_NAME_LENGTH: usize = 63;

/// Number of characters kept when a name is shortened, the rest is replaced by an MD5 hex digest.
const TRUNCATED_PREFIX_LENGTH: usize = MAX_NAME_LENGTH - 32;

static INVALID_NAME_CHARS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[^-a-z0-9]+").expect("failed to compile invalid name characters regex")
});

static SECRET_NAME_PART_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[a-z0-9-]*").expect("failed to compile secret name part regex")
});

static SECRET_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[^-][a-z0-9-]*.[a-z0-9-]*[^-]").expect("failed to compile secret name regex")
});

/// The kinds of secrets created during the lifecycle of a deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum DeploymentSecretType {
    /// The manifest with all ops files applied.
    #[strum(serialize = "with-ops")]
    ManifestWithOps,

    /// The manifest with all variables interpolated.
    #[strum(serialize = "with-vars")]
    ManifestAndVars,

    /// A variable generated by the secret generator.
    #[strum(serialize = "var")]
    GeneratedVariable,

    /// Properties needed to render the templates of one instance group.
    #[strum(serialize = "ig-resolved")]
    InstanceGroupResolvedProperties,

    /// The BPM information of one instance group.
    #[strum(serialize = "bpm")]
    InstanceGroupBpm,

    /// Output of the variable interpolation job.
    #[strum(serialize = "desired-manifest")]
    DesiredManifest,
}

/// Lower cases `name` and replaces everything not allowed in a RFC 1123 label with `-`.
/// Names longer than 63 characters are shortened to 31 characters plus an MD5 hex digest.
pub fn sanitize(name: &str) -> String {
    let lower = name.to_lowercase();
    let replaced = INVALID_NAME_CHARS_REGEX.replace_all(&lower, "-");
    truncate_with_digest(replaced.trim_matches('-'))
}

fn truncate_with_digest(name: &str) -> String {
    if name.len() <= MAX_NAME_LENGTH {
        return name.to_owned();
    }
    let digest = hex::encode(Md5::digest(name.as_bytes()));
    format!("{}{digest}", &name[..TRUNCATED_PREFIX_LENGTH])
}

/// Calculates the name of a deployment secret: `<deployment>.<type>` or
/// `<deployment>.<type>-<variable>`.
///
/// Underscores are replaced with dashes and each part is cut at its first character not allowed
/// in a secret name.
pub fn calculate_secret_name(
    secret_type: DeploymentSecretType,
    deployment: &str,
    variable: &str,
) -> String {
    let variable = if variable.is_empty() {
        secret_type.to_string()
    } else {
        format!("{secret_type}-{variable}")
    };

    let leading_part = |part: &str| {
        let part = part.replace('_', "-");
        SECRET_NAME_PART_REGEX
            .find(&part)
            .map(|m| m.as_str().to_owned())
            .unwrap_or_default()
    };
    let joined = format!("{}.{}", leading_part(deployment), leading_part(&variable));
    let name = SECRET_NAME_REGEX
        .find(&joined)
        .map(|m| m.as_str())
        .unwrap_or_default();

    truncate_with_digest(name)
}

/// Prefix of the secrets a job writes its output to. The job appends the container name.
pub fn output_secret_prefix(secret_type: DeploymentSecretType, deployment: &str) -> String {
    format!("{}.", calculate_secret_name(secret_type, deployment, ""))
}

/// Name of the secret holding the value of the implicit variable `variable`.
pub fn implicit_variable_secret_name(deployment: &str, variable: &str) -> String {
    calculate_secret_name(DeploymentSecretType::GeneratedVariable, deployment, variable)
}

/// Name prefix shared by all versions of an instance group secret.
pub fn instance_group_secret_prefix(
    secret_type: DeploymentSecretType,
    deployment: &str,
    instance_group: &str,
) -> String {
    format!(
        "{}{}",
        output_secret_prefix(secret_type, deployment),
        sanitize(instance_group)
    )
}

/// Name of one version of an instance group secret.
pub fn instance_group_secret_name(
    secret_type: DeploymentSecretType,
    deployment: &str,
    instance_group: &str,
    version: &str,
) -> String {
    versioned_secret_name(
        &instance_group_secret_prefix(secret_type, deployment, instance_group),
        version,
    )
}

/// Name prefix shared by all versions of the desired manifest.
pub fn desired_manifest_prefix(deployment: &str) -> String {
    calculate_secret_name(DeploymentSecretType::DesiredManifest, deployment, "")
}

pub fn versioned_secret_name(prefix: &str, version: &str) -> String {
    format!("{prefix}-v{version}")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("nats", "nats")]
    #[case("Nats_Server", "nats-server")]
    #[case("-log.api-", "log-api")]
    #[case("a/b c", "a-b-c")]
    fn sanitize_names(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize(input), expected);
    }

    #[test]
    fn sanitize_truncates_long_names() {
        let long = "a".repeat(70);
        let name = sanitize(&long);
        assert_eq!(name.len(), MAX_NAME_LENGTH);
        assert!(name.starts_with(&"a".repeat(31)));
    }

    #[rstest]
    #[case(DeploymentSecretType::GeneratedVariable, "foo-deployment", "system_domain", "foo-deployment.var-system-domain")]
    #[case(DeploymentSecretType::ManifestWithOps, "foo-deployment", "", "foo-deployment.with-ops")]
    #[case(DeploymentSecretType::GeneratedVariable, "foo", "nats_password.ca", "foo.var-nats-password")]
    #[case(DeploymentSecretType::InstanceGroupResolvedProperties, "-foo", "", "foo.ig-resolved")]
    fn secret_names(
        #[case] secret_type: DeploymentSecretType,
        #[case] deployment: &str,
        #[case] variable: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(
            calculate_secret_name(secret_type, deployment, variable),
            expected
        );
    }

    #[test]
    fn long_secret_names_are_truncated() {
        let name = calculate_secret_name(
            DeploymentSecretType::GeneratedVariable,
            "deployment",
            &"very_long_variable_name".repeat(3),
        );
        assert_eq!(name.len(), MAX_NAME_LENGTH);
        assert!(name.starts_with("deployment.var-very-long-variab"));
    }

    #[test]
    fn instance_group_secret_names() {
        assert_eq!(
            instance_group_secret_name(
                DeploymentSecretType::InstanceGroupResolvedProperties,
                "nats-deployment",
                "nats",
                "1"
            ),
            "nats-deployment.ig-resolved.nats-v1"
        );
        assert_eq!(
            output_secret_prefix(DeploymentSecretType::InstanceGroupBpm, "nats-deployment"),
            "nats-deployment.bpm."
        );
        assert_eq!(
            versioned_secret_name(&desired_manifest_prefix("nats-deployment"), "2"),
            "nats-deployment.desired-manifest-v2"
        );
    }
}
