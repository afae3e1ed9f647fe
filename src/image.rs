//! In-memory topology model for a cell image
//!
//! A [`CellImage`] is constructed fresh for every build, run, or test
//! invocation from already-parsed external input. It is never persisted
//! itself; only the descriptor derived from it by [`crate::compiler`] is
//! written to durable storage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::ingress::{GrpcIngress, HttpApi, TcpIngress, WebIngress};
use crate::Result;

/// Backend protocol a component serves, recorded by the ingress normalizer.
///
/// HTTP and web ingresses leave this unset: they always map to the gateway's
/// default HTTP handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// Plain HTTP backend
    #[serde(rename = "HTTP")]
    Http,
    /// Raw TCP backend
    #[serde(rename = "TCP")]
    Tcp,
    /// gRPC backend
    #[serde(rename = "GRPC")]
    Grpc,
}

impl Protocol {
    /// Wire-level name of the protocol
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Tcp => "TCP",
            Protocol::Grpc => "GRPC",
        }
    }
}

/// Probe action kind
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeKind {
    /// TCP socket probe against a port
    TcpSocket {
        /// Port to connect to
        port: u16,
    },
    /// HTTP GET probe
    HttpGet {
        /// Request path
        path: String,
        /// Port to issue the request against
        port: u16,
        /// Extra request headers
        headers: BTreeMap<String, String>,
    },
    /// Command executed inside the container
    Exec {
        /// Command and arguments
        command: Vec<String>,
    },
}

/// Liveness/readiness probe configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    /// Probe action
    pub kind: ProbeKind,
    /// Seconds to wait before the first probe
    pub initial_delay_seconds: u32,
    /// Seconds between probes
    pub period_seconds: u32,
    /// Consecutive failures before the probe is considered failed
    pub failure_threshold: u32,
    /// Seconds after which a single probe attempt times out
    pub timeout_seconds: u32,
    /// Consecutive successes before the probe is considered passing
    pub success_threshold: u32,
}

/// One (metric, target) pair in an autoscaling policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingMetric {
    /// Metric name ("cpu")
    pub name: String,
    /// Target average utilization percentage
    pub target_percentage: u32,
}

/// Autoscaling policy for one component
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScaling {
    /// Lower replica bound
    pub min_replicas: u32,
    /// Upper replica bound
    pub max_replicas: u32,
    /// Scaling metrics
    pub metrics: Vec<ScalingMetric>,
    /// Whether a running instance may override this policy
    pub overridable: bool,
}

impl AutoScaling {
    /// CPU-utilization policy, the canonical metric
    pub fn cpu(min_replicas: u32, max_replicas: u32, percentage: u32, overridable: bool) -> Self {
        Self {
            min_replicas,
            max_replicas,
            metrics: vec![ScalingMetric {
                name: "cpu".to_string(),
                target_percentage: percentage,
            }],
            overridable,
        }
    }
}

/// A resolved dependency on another cell image
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Organization publishing the depended-on image
    pub org: String,
    /// Image name
    pub name: String,
    /// Image version
    #[serde(rename = "ver")]
    pub version: String,
    /// Alias this cell refers to the dependency by
    pub alias: String,
}

/// A raw per-component dependency declaration, before resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DependencyDecl {
    /// Compact `org/name:version` form
    Compact(String),
    /// Structured form
    Triple {
        /// Organization
        org: String,
        /// Image name
        name: String,
        /// Image version
        version: String,
    },
}

/// Where a test's executable content comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestSource {
    /// In-repo test module, run locally by the external test runner
    Module(String),
    /// Container image, run as a one-shot job in the cluster
    Image(String),
}

/// Verification test attached to a cell image
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Test {
    /// Test name; also names the throwaway test cell
    pub name: String,
    /// Test source
    pub source: TestSource,
    /// Environment variables passed to the test container
    pub env: BTreeMap<String, String>,
    /// Labels attached to the test job
    pub labels: BTreeMap<String, String>,
}

impl Test {
    /// Create a test with the given name and source
    pub fn new(name: impl Into<String>, source: TestSource) -> Self {
        Self {
            name: name.into(),
            source,
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// One component of a cell image
#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    /// Component identity
    pub name: String,
    /// Derived service name (sanitized identity)
    pub service_name: String,
    /// Container image reference
    pub image: String,
    /// Single container port, asserted by the first ingress
    pub container_port: Option<u16>,
    /// Replica count
    pub replicas: u32,
    /// Labels
    pub labels: BTreeMap<String, String>,
    /// Environment variables; empty values are permitted but flagged
    pub env: BTreeMap<String, String>,
    /// Liveness probe
    pub liveness_probe: Option<Probe>,
    /// Readiness probe
    pub readiness_probe: Option<Probe>,
    /// Autoscaling policy
    pub autoscaling: Option<AutoScaling>,
    /// HTTP API ingresses
    pub http_apis: Vec<HttpApi>,
    /// TCP ingresses
    pub tcp_ingresses: Vec<TcpIngress>,
    /// gRPC ingresses
    pub grpc_ingresses: Vec<GrpcIngress>,
    /// Web ingresses; only the first is honored by the gateway synthesizer
    pub web_ingresses: Vec<WebIngress>,
    /// Contexts of HTTP APIs explicitly marked unauthenticated
    pub unsecured_paths: Vec<String>,
    /// Backend protocol, set by the ingress normalizer for TCP/gRPC
    pub protocol: Option<Protocol>,
    /// Raw dependency declarations (alias, declaration), resolved at build
    pub dependencies: Vec<(String, DependencyDecl)>,
}

impl Component {
    /// Create a component; the service name is derived from the identity
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        let name = name.into();
        let service_name = sanitize_name(&name);
        Self {
            name,
            service_name,
            image: image.into(),
            container_port: None,
            replicas: 1,
            labels: BTreeMap::new(),
            env: BTreeMap::new(),
            liveness_probe: None,
            readiness_probe: None,
            autoscaling: None,
            http_apis: Vec::new(),
            tcp_ingresses: Vec::new(),
            grpc_ingresses: Vec::new(),
            web_ingresses: Vec::new(),
            unsecured_paths: Vec::new(),
            protocol: None,
            dependencies: Vec::new(),
        }
    }

    /// Set the replica count
    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the autoscaling policy
    pub fn with_autoscaling(mut self, policy: AutoScaling) -> Self {
        self.autoscaling = Some(policy);
        self
    }

    /// Set the liveness probe
    pub fn with_liveness_probe(mut self, probe: Probe) -> Self {
        self.liveness_probe = Some(probe);
        self
    }

    /// Set the readiness probe
    pub fn with_readiness_probe(mut self, probe: Probe) -> Self {
        self.readiness_probe = Some(probe);
        self
    }

    /// Declare a dependency on another cell image under an alias
    pub fn with_dependency(mut self, alias: impl Into<String>, decl: DependencyDecl) -> Self {
        self.dependencies.push((alias.into(), decl));
        self
    }
}

/// Aggregate root: the declarative, versioned description of a
/// multi-component application topology
#[derive(Clone, Debug, PartialEq)]
pub struct CellImage {
    /// Organization publishing the image
    pub org: String,
    /// Image name
    pub name: String,
    /// Image version
    pub version: String,
    /// Components, keyed by name
    components: BTreeMap<String, Component>,
    /// Tags of container images built alongside this cell image
    pub image_tags: Vec<String>,
    /// Whether this is a composite (gateway-less) image
    pub composite: bool,
    /// Attached verification test
    pub test: Option<Test>,
}

impl CellImage {
    /// Create an empty cell image
    pub fn new(
        org: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            org: org.into(),
            name: name.into(),
            version: version.into(),
            components: BTreeMap::new(),
            image_tags: Vec::new(),
            composite: false,
            test: None,
        }
    }

    /// Insert a component.
    ///
    /// Component names are unique within a cell image; a duplicate name is a
    /// fatal configuration error.
    pub fn add_component(&mut self, component: Component) -> Result<()> {
        if self.components.contains_key(&component.name) {
            return Err(Error::configuration(format!(
                "duplicate component name '{}'",
                component.name
            )));
        }
        self.components.insert(component.name.clone(), component);
        Ok(())
    }

    /// Look up a component by name
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }

    /// Iterate components in name order
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    /// Number of components
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Attach a verification test
    pub fn with_test(mut self, test: Test) -> Self {
        self.test = Some(test);
        self
    }

    /// Record a built container image tag for the metadata artifact
    pub fn add_image_tag(&mut self, tag: impl Into<String>) {
        self.image_tags.push(tag.into());
    }
}

/// Derive a cluster-safe service name from a component or cell identity.
///
/// Lowercases and replaces every character outside `[a-z0-9-]` with `-`.
pub fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
