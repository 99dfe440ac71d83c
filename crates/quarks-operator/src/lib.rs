//! A Kubernetes operator deploying BOSH releases.
//!
//! A [`BoshDeployment`](crd::BoshDeployment) references a BOSH manifest and ops files. The
//! [`controller`]s resolve the manifest, request generated variables, run the jobs that
//! interpolate variables and gather the BPM information, and finally convert every instance group
//! into QuarksStatefulSets, QuarksJobs and Services.
pub mod builder;
pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod converter;
pub mod crd;
pub mod logging;
pub mod resolver;
pub mod yaml;
