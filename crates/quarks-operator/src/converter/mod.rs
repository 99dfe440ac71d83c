//! Converts a resolved manifest into Kubernetes objects.
//!
//! Everything in here is a pure function of the manifest, the BPM configs and the operator
//! configuration. Applying the objects is left to the controllers.
pub mod container_factory;
pub mod disk;
pub mod job_factory;
pub mod kube_converter;
pub mod volume_factory;
