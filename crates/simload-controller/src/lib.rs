//! Load generation for ScaleLoadConfig
//!
//! This crate provides the reconciler that scales namespaces, workload
//! objects, events and node annotations with the number of KWOK nodes.
//!
//! - [`planner`] turns node counts into targets and tick intervals
//! - [`namespaces`] and [`churn`] converge generated objects
//! - [`annotations`] churns node annotations under optimistic concurrency
//! - [`store`] is the object-store seam every write goes through

pub mod annotations;
pub mod churn;
pub mod config_client;
pub mod controller;
pub mod namespaces;
pub mod planner;
pub mod random;
pub mod rate_budget;
pub mod runtime;
pub mod status;
pub mod store;

pub use config_client::{LoadConfigClient, LoadConfigClientImpl};
pub use controller::{error_policy, reconcile, Context};

pub use simload_common::{Error, Result};
