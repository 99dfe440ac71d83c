//! Mutate functions for [`Client::create_or_update`](super::Client::create_or_update).
//!
//! Each one merges the fields the operator owns from the desired object into the current one.
//! Everything else, like the cluster IP of a service, stays as it is.
use k8s_openapi::{
    api::core::v1::{Secret, Service, ServiceSpec},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};

use crate::crd::{QuarksJob, QuarksSecret, QuarksStatefulSet};

fn owner_references(current: &mut ObjectMeta, desired: &ObjectMeta) {
    if desired.owner_references.is_some() {
        current.owner_references.clone_from(&desired.owner_references);
    }
}

fn labels_and_annotations(current: &mut ObjectMeta, desired: &ObjectMeta) {
    current.labels.clone_from(&desired.labels);
    current.annotations.clone_from(&desired.annotations);
    owner_references(current, desired);
}

pub fn secret(current: &mut Secret, desired: &Secret) {
    labels_and_annotations(&mut current.metadata, &desired.metadata);
    current.type_.clone_from(&desired.type_);
    current.data.clone_from(&desired.data);
    current.string_data.clone_from(&desired.string_data);
}

pub fn quarks_secret(current: &mut QuarksSecret, desired: &QuarksSecret) {
    labels_and_annotations(&mut current.metadata, &desired.metadata);
    current.spec.clone_from(&desired.spec);
}

/// Annotations are only set on jobs without any, the trigger strategy is never reset. Both are
/// changed by users and the job runner to trigger runs.
pub fn quarks_job(current: &mut QuarksJob, desired: &QuarksJob) {
    current.metadata.labels.clone_from(&desired.metadata.labels);
    if current.metadata.annotations.is_none() {
        current
            .metadata
            .annotations
            .clone_from(&desired.metadata.annotations);
    }
    owner_references(&mut current.metadata, &desired.metadata);

    current.spec.output.clone_from(&desired.spec.output);
    current.spec.template.clone_from(&desired.spec.template);
    current.spec.update_on_config_change = desired.spec.update_on_config_change;
}

pub fn quarks_stateful_set(current: &mut QuarksStatefulSet, desired: &QuarksStatefulSet) {
    labels_and_annotations(&mut current.metadata, &desired.metadata);
    current.spec.clone_from(&desired.spec);
}

/// Only ports and selector are taken over, the cluster assigned addresses are kept.
pub fn service(current: &mut Service, desired: &Service) {
    labels_and_annotations(&mut current.metadata, &desired.metadata);

    let desired_spec = desired.spec.clone().unwrap_or_default();
    let spec = current.spec.get_or_insert_with(ServiceSpec::default);
    spec.ports = desired_spec.ports;
    spec.selector = desired_spec.selector;
}
