//! cellc - compiles declarative cell images into composite deployment descriptors
//!
//! A cell image describes a multi-component application: each component carries
//! network ingresses, a scaling policy, health probes, and dependencies on other
//! cell images. This crate turns that description into a single composite
//! descriptor for a container-orchestration cluster, re-materializes a compiled
//! descriptor into a running instance with caller-supplied parameter overrides,
//! and orchestrates one-shot verification jobs against a running instance.
//!
//! # Modules
//!
//! - [`image`] - In-memory topology model (CellImage, Component, Test, probes)
//! - [`ingress`] - Tagged ingress variants and the ingress normalizer
//! - [`descriptor`] - Serialized descriptor document types
//! - [`compiler`] - Gateway synthesis and the build pipeline
//! - [`reference`] - Reference contract generator for consuming cells
//! - [`metadata`] - Dependency resolution and the metadata artifact
//! - [`instance`] - Instance materializer (parameter overlay on a descriptor)
//! - [`testrun`] - Test-job orchestrator and cluster command runner
//! - [`error`] - Error types
//!
//! # Flow
//!
//! [`compiler::build`] validates a [`image::CellImage`] and writes the
//! descriptor, reference, and metadata artifacts. Later,
//! [`instance::materialize`] re-opens the descriptor and overlays runtime
//! parameter values. Independently, [`testrun::TestOrchestrator`] runs the
//! image's attached test against a running instance.

#![deny(missing_docs)]

pub mod compiler;
pub mod descriptor;
pub mod error;
pub mod image;
pub mod ingress;
pub mod instance;
pub mod metadata;
pub mod reference;
pub mod testrun;

pub use error::Error;

use std::time::Duration;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Centralizing these here keeps the descriptor writer, the materializer, and
// the test orchestrator in agreement about wire-level names and timings.

/// API version written into the descriptor envelope
pub const DESCRIPTOR_API_VERSION: &str = "mesh.cellc.dev/v1alpha1";

/// Kind written into the descriptor envelope
pub const DESCRIPTOR_KIND: &str = "Cell";

/// Port the gateway exposes for HTTP and web ingresses
pub const DEFAULT_GATEWAY_PORT: u16 = 80;

/// Scheme used for generated reference URLs
pub const DEFAULT_GATEWAY_PROTOCOL: &str = "http";

/// Placeholder token for the not-yet-known instance name.
///
/// Build-time artifacts embed this token; it is substituted when an instance
/// is materialized with a concrete name.
pub const INSTANCE_NAME_PLACEHOLDER: &str = "{{instance}}";

/// Suffix appended to an instance name to form its gateway service host
pub const GATEWAY_SERVICE_SUFFIX: &str = "--gateway-service";

/// Annotation key for the image organization
pub const ANNOTATION_IMAGE_ORG: &str = "mesh.cellc.dev/image-org";

/// Annotation key for the image name
pub const ANNOTATION_IMAGE_NAME: &str = "mesh.cellc.dev/image-name";

/// Annotation key for the image version
pub const ANNOTATION_IMAGE_VERSION: &str = "mesh.cellc.dev/image-version";

/// Annotation key for the JSON-encoded dependency list
pub const ANNOTATION_IMAGE_DEPENDENCIES: &str = "mesh.cellc.dev/image-dependencies";

/// Environment variable naming the root of the unpacked cell image sources
pub const CELL_IMAGE_DIR_ENV: &str = "CELL_IMAGE_DIR";

/// Directory (under the output root) holding the descriptor and metadata
pub const CELL_ARTIFACT_DIR: &str = "cell";

/// Directory (under the output root) holding the reference artifact
pub const REFERENCE_ARTIFACT_DIR: &str = "ref";

/// File name of the reference artifact
pub const REFERENCE_FILE_NAME: &str = "reference.json";

/// File name of the metadata artifact
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Interval between successive cluster polls while waiting on a test job
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How long to wait for a test pod to reach the Running phase
pub const POD_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// How long to wait for a test pod name to appear after submission
pub const POD_NAME_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long to wait for a test job to reach a terminal condition
pub const JOB_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
