//! The contract between the pods created for an instance group and the template render step.
use std::sync::LazyLock;

use regex::Regex;
use snafu::{Snafu, ensure};

static POD_ORDINAL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-(\d+)(?:-|\.|$)").expect("failed to compile pod ordinal regex")
});

/// Environment variables the template render container reads.
pub mod env {
    pub const INSTANCE_GROUP_NAME: &str = "INSTANCE_GROUP_NAME";
    pub const BOSH_MANIFEST_PATH: &str = "BOSH_MANIFEST_PATH";
    pub const JOBS_DIR: &str = "JOBS_DIR";
    pub const POD_IP: &str = "POD_IP";
    pub const POD_ORDINAL: &str = "POD_ORDINAL";
    pub const REPLICAS: &str = "REPLICAS";
    pub const AZ_INDEX: &str = "AZ_INDEX";
    pub const INITIAL_ROLLOUT: &str = "INITIAL_ROLLOUT";
}

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("AZ index {az_index} must be at least 1"))]
    InvalidAzIndex { az_index: i32 },

    #[snafu(display("pod ordinal {pod_ordinal} must not be negative"))]
    InvalidPodOrdinal { pod_ordinal: i32 },
}

/// Index of an instance within its instance group, used to pick the per-instance spec when no
/// explicit index is given.
///
/// AZ indices start at 1, pod ordinals at 0.
pub fn spec_index(az_index: i32, replicas: i32, pod_ordinal: i32) -> Result<i32, Error> {
    ensure!(az_index >= 1, InvalidAzIndexSnafu { az_index });
    ensure!(pod_ordinal >= 0, InvalidPodOrdinalSnafu { pod_ordinal });
    Ok((az_index - 1) * replicas + pod_ordinal)
}

/// Extracts the pod ordinal from a stateful pod name or host name, e.g. `nats-z0-1` or
/// `nats-1.nats.default.svc`.
pub fn pod_ordinal_from_name(name: &str) -> Option<i32> {
    POD_ORDINAL_REGEX
        .captures_iter(name)
        .last()
        .and_then(|captures| captures[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1, 3, 0, 0)]
    #[case(1, 3, 2, 2)]
    #[case(2, 3, 0, 3)]
    #[case(3, 2, 1, 5)]
    fn computes_spec_index(
        #[case] az_index: i32,
        #[case] replicas: i32,
        #[case] pod_ordinal: i32,
        #[case] expected: i32,
    ) {
        assert_eq!(spec_index(az_index, replicas, pod_ordinal), Ok(expected));
    }

    #[test]
    fn az_index_starts_at_one() {
        assert_eq!(
            spec_index(0, 3, 0),
            Err(Error::InvalidAzIndex { az_index: 0 })
        );
    }

    #[rstest]
    #[case("nats-z0-1", Some(1))]
    #[case("nats-12", Some(12))]
    #[case("nats-z1-0.nats.default.svc", Some(0))]
    #[case("nats", None)]
    fn parses_pod_ordinal(#[case] name: &str, #[case] expected: Option<i32>) {
        assert_eq!(pod_ordinal_from_name(name), expected);
    }
}
