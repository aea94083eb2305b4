//! Common types for simload: the ScaleLoadConfig CRD, errors, and utilities
//!
//! - [`crd`]: `ScaleLoadConfig` spec/status and the shared `Condition` type
//! - [`labels`]: identity labels and annotations written onto managed objects
//! - [`error`]: controller and object-store error types
//! - [`retry`]: exponential backoff with jitter
//! - [`metrics`]: OpenTelemetry instruments for scraping
//! - [`telemetry`]: tracing subscriber and OTLP export setup
//! - [`events`]: Kubernetes Event publishing on ScaleLoadConfig objects

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod labels;
pub mod metrics;
pub mod retry;
pub mod telemetry;

pub use error::{Error, StoreError};
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every patch the operator sends
pub const FIELD_MANAGER: &str = "sim-operator";

/// Value of the `created-by` label on every managed object
pub const CREATED_BY: &str = "sim-operator";
