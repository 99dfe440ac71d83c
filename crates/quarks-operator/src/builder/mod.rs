//! Builders for the Kubernetes objects the converter assembles.
//!
//! They are not _pure_ builders, some of them normalize their input (e.g. the container builder
//! drops volume mounts for paths that are already mounted).
pub mod meta;
pub mod pod;
