//! Data model and pure transformations for BOSH deployment manifests.
//!
//! Nothing in this crate talks to Kubernetes. The operator crate fetches the raw documents and
//! hands them to the functions here:
//!
//! - [`patch`] applies go-patch style ops files to a YAML document,
//! - [`interpolate`] substitutes `((variable))` placeholders,
//! - [`manifest`] parses the result into a typed [`Manifest`](manifest::Manifest),
//! - [`bpm`] models the per-job process configuration gathered after rendering.
pub mod bpm;
pub mod interpolate;
pub mod manifest;
pub mod names;
pub mod patch;
pub mod render;

pub use manifest::Manifest;
