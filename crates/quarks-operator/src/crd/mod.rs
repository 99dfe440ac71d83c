//! Custom resources the operator reconciles or writes.
//!
//! [`BoshDeployment`] is the user facing resource. [`QuarksSecret`], [`QuarksJob`] and
//! [`QuarksStatefulSet`] belong to the secret generator, the job runner and the stateful set
//! lifecycle controller. Their definitions here only cover the fields this operator writes.
mod boshdeployment;
mod quarks_job;
mod quarks_secret;
mod quarks_statefulset;

pub use boshdeployment::*;
pub use quarks_job::*;
pub use quarks_secret::*;
pub use quarks_statefulset::*;

pub const GROUP: &str = "quarks.cloudfoundry.org";

pub const LABEL_DEPLOYMENT_NAME: &str = "quarks.cloudfoundry.org/deployment-name";
pub const LABEL_INSTANCE_GROUP_NAME: &str = "quarks.cloudfoundry.org/instance-group-name";
pub const LABEL_DEPLOYMENT_SECRET_TYPE: &str = "quarks.cloudfoundry.org/secret-type";
/// Set by the job runner on output secrets, holds the name of the container which produced it.
pub const LABEL_REMOTE_ID: &str = "quarks.cloudfoundry.org/remote-id";
pub const LABEL_SECRET_KIND: &str = "quarks.cloudfoundry.org/secret-kind";
pub const LABEL_SECRET_VERSION: &str = "quarks.cloudfoundry.org/secret-version";
pub const SECRET_KIND_VERSIONED: &str = "versionedSecret";

/// Set on pods by the stateful set lifecycle controller.
pub const LABEL_POD_ORDINAL: &str = "quarks.cloudfoundry.org/pod-ordinal";
pub const LABEL_AZ_INDEX: &str = "quarks.cloudfoundry.org/az-index";

pub const ANNOTATION_MANIFEST_SHA1: &str = "quarks.cloudfoundry.org/manifest-sha1";
pub const ANNOTATION_LAST_RECONCILE: &str = "quarks.cloudfoundry.org/last-reconcile";
