//! Serialized descriptor document types
//!
//! These structs define the exact wire shape of the compiled cell descriptor.
//! They are deliberately separate from the topology model in [`crate::image`]:
//! the model is what callers build, the descriptor is what the cluster reads.
//! Field names follow the cluster's camelCase convention; optional and empty
//! sections are skipped on output so the document stays minimal.
//!
//! The instance materializer round-trips this document, so every type here
//! derives `Deserialize` with defaults for sections a hand-edited descriptor
//! might omit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level compiled cell descriptor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellDescriptor {
    /// Descriptor schema version
    pub api_version: String,
    /// Document kind
    pub kind: String,
    /// Name and provenance annotations
    pub metadata: DescriptorMeta,
    /// Gateway, services, and security filter
    pub spec: CellSpec,
}

/// Descriptor metadata block
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DescriptorMeta {
    /// Cell name (sanitized image name)
    pub name: String,
    /// Provenance annotations (image org/name/version, dependency list)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Cell spec: one gateway, N services, one security filter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSpec {
    /// Gateway template
    pub gateway: GatewayTemplate,
    /// Service templates, one per component
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceTemplate>,
    /// Security filter template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityTemplate>,
}

/// Gateway template wrapper
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewayTemplate {
    /// Gateway spec
    pub spec: GatewaySpec,
}

/// Gateway implementation kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayKind {
    /// Full edge proxy; required for web, TCP, and gRPC routing
    #[serde(rename = "edge-proxy")]
    EdgeProxy,
    /// Lightweight API gateway; sufficient for plain HTTP APIs
    #[serde(rename = "micro-gateway")]
    MicroGateway,
}

/// Synthesized gateway spec
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// Gateway implementation kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "type")]
    pub kind: Option<GatewayKind>,
    /// Virtual host, set by a web ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// TLS termination material, set by a web ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,
    /// OIDC sign-on configuration, set by a web ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcSpec>,
    /// HTTP routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpRoute>,
    /// TCP routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tcp: Vec<TcpRoute>,
    /// gRPC routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grpc: Vec<GrpcRoute>,
}

/// TLS key material on the gateway
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    /// PEM-encoded private key
    pub tls_key: String,
    /// PEM-encoded certificate
    pub tls_cert: String,
}

/// OIDC sign-on block on the gateway
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcSpec {
    /// Identity provider discovery endpoint
    pub discovery_url: String,
    /// Redirect URL registered with the provider
    pub redirect_url: String,
    /// Application base URL
    pub base_url: String,
    /// OIDC client id
    pub client_id: String,
    /// Path patterns requiring an authenticated session
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secure_paths: Vec<String>,
    /// Path patterns exempt from authentication
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_secure_paths: Vec<String>,
    /// Claim used as the authenticated subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_claim: Option<String>,
    /// Static client secret (mutually exclusive with DCR fields)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Dynamic client registration user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dcr_user: Option<String>,
    /// Dynamic client registration password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dcr_password: Option<String>,
    /// Dynamic client registration endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dcr_url: Option<String>,
}

/// One HTTP route on the gateway
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    /// API context path
    pub context: String,
    /// Backend service name
    pub backend: String,
    /// Whether the route is published beyond the cell boundary
    #[serde(rename = "isGlobal")]
    pub is_global: bool,
    /// Whether callers must authenticate
    pub authenticate: bool,
    /// Resource definitions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub definitions: Vec<RouteDefinition>,
}

/// One resource definition under an HTTP route
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteDefinition {
    /// HTTP method
    pub method: String,
    /// Resource path relative to the context
    pub path: String,
}

/// One TCP route on the gateway
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpRoute {
    /// Port the gateway listens on
    pub port: u16,
    /// Container port the traffic is forwarded to
    pub backend_port: u16,
    /// Backend service host
    pub backend_host: String,
}

/// One gRPC route on the gateway
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcRoute {
    /// Port the gateway listens on
    pub port: u16,
    /// Container port the traffic is forwarded to
    pub backend_port: u16,
    /// Backend service host
    pub backend_host: String,
    /// Optional protobuf definition file reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto_file: Option<String>,
}

/// One service template, derived from one component
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceTemplate {
    /// Service name and labels
    pub metadata: TemplateMeta,
    /// Service spec
    pub spec: ServiceSpec,
}

/// Metadata block shared by templates
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateMeta {
    /// Template name
    pub name: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Spec of one service template
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Replica count
    pub replicas: u32,
    /// Port the cell routes to this service on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_port: Option<u16>,
    /// Backend protocol label ("HTTP", "TCP", "GRPC")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Container definition
    pub container: ContainerSpec,
    /// Autoscaling block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<AutoscalingSpec>,
}

/// Container definition inside a service template
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Container image reference
    pub image: String,
    /// Exposed container ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    /// Environment variables, in emission order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Liveness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<ProbeSpec>,
    /// Readiness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ProbeSpec>,
}

/// One container port
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port number
    pub container_port: u16,
}

/// One environment variable
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value; may be empty until overridden at run time
    #[serde(default)]
    pub value: String,
}

/// Probe wire shape: exactly one action plus timing fields
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSpec {
    /// TCP socket action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_socket: Option<TcpSocketAction>,
    /// HTTP GET action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpGetAction>,
    /// Exec action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecAction>,
    /// Seconds to wait before the first probe
    pub initial_delay_seconds: u32,
    /// Seconds between probes
    pub period_seconds: u32,
    /// Seconds after which a single attempt times out
    pub timeout_seconds: u32,
    /// Consecutive failures before the probe fails
    pub failure_threshold: u32,
    /// Consecutive successes before the probe passes
    pub success_threshold: u32,
}

/// TCP socket probe action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TcpSocketAction {
    /// Port to connect to
    pub port: u16,
}

/// HTTP GET probe action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpGetAction {
    /// Request path
    pub path: String,
    /// Port to issue the request against
    pub port: u16,
    /// Extra request headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_headers: Vec<HttpHeader>,
}

/// One HTTP header on a probe request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpHeader {
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
}

/// Exec probe action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecAction {
    /// Command and arguments
    pub command: Vec<String>,
}

/// Autoscaling block on a service template
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoscalingSpec {
    /// Whether a running instance may override the policy
    pub overridable: bool,
    /// Scaling policy
    pub policy: ScalePolicy,
}

/// Replica bounds and metrics of an autoscaling policy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalePolicy {
    /// Lower replica bound
    pub min_replicas: u32,
    /// Upper replica bound
    pub max_replicas: u32,
    /// Scaling metrics
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<MetricSpec>,
}

/// One scaling metric, resource-utilization shaped
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Metric type discriminator
    #[serde(rename = "type")]
    pub metric_type: String,
    /// Resource metric details
    pub resource: ResourceMetric,
}

/// Resource-utilization metric details
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetric {
    /// Resource name ("cpu")
    pub name: String,
    /// Target average utilization percentage
    pub target_average_utilization: u32,
}

/// Security filter template: the union of unsecured API contexts
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityTemplate {
    /// Security filter spec
    pub spec: SecuritySpec,
}

/// Spec of the security filter template
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    /// Contexts exempt from token checks, cell-wide
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsecured_paths: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Story: The Descriptor Serializes in Cluster camelCase
    // =========================================================================

    #[test]
    fn story_gateway_spec_uses_wire_names() {
        let spec = GatewaySpec {
            kind: Some(GatewayKind::MicroGateway),
            http: vec![HttpRoute {
                context: "hr-api".to_string(),
                backend: "hr".to_string(),
                is_global: true,
                authenticate: true,
                definitions: vec![RouteDefinition {
                    method: "GET".to_string(),
                    path: "/".to_string(),
                }],
            }],
            ..Default::default()
        };

        let yaml = serde_yaml::to_string(&spec).unwrap();
        assert!(yaml.contains("type: micro-gateway"));
        assert!(yaml.contains("isGlobal: true"));
        // Empty sections stay off the wire
        assert!(!yaml.contains("tcp:"));
        assert!(!yaml.contains("host:"));
    }

    #[test]
    fn story_probe_spec_carries_exactly_one_action() {
        let probe = ProbeSpec {
            tcp_socket: Some(TcpSocketAction { port: 8080 }),
            initial_delay_seconds: 10,
            period_seconds: 5,
            timeout_seconds: 1,
            failure_threshold: 3,
            success_threshold: 1,
            ..Default::default()
        };

        let yaml = serde_yaml::to_string(&probe).unwrap();
        assert!(yaml.contains("tcpSocket:"));
        assert!(yaml.contains("initialDelaySeconds: 10"));
        assert!(!yaml.contains("httpGet"));
        assert!(!yaml.contains("exec"));
    }

    // =========================================================================
    // Story: A Hand-Edited Descriptor Still Parses
    // =========================================================================

    #[test]
    fn story_descriptor_round_trips_through_yaml() {
        let descriptor = CellDescriptor {
            api_version: crate::DESCRIPTOR_API_VERSION.to_string(),
            kind: crate::DESCRIPTOR_KIND.to_string(),
            metadata: DescriptorMeta {
                name: "employee".to_string(),
                annotations: BTreeMap::new(),
            },
            spec: CellSpec {
                gateway: GatewayTemplate {
                    spec: GatewaySpec::default(),
                },
                services: vec![ServiceTemplate {
                    metadata: TemplateMeta {
                        name: "hr".to_string(),
                        labels: BTreeMap::new(),
                    },
                    spec: ServiceSpec {
                        replicas: 1,
                        service_port: Some(80),
                        protocol: None,
                        container: ContainerSpec {
                            image: "myorg/hr:1.0.0".to_string(),
                            ports: vec![ContainerPort {
                                container_port: 8080,
                            }],
                            env: vec![EnvVar {
                                name: "SALARY_HOST".to_string(),
                                value: String::new(),
                            }],
                            liveness_probe: None,
                            readiness_probe: None,
                        },
                        autoscaling: None,
                    },
                }],
                security: None,
            },
        };

        let yaml = serde_yaml::to_string(&descriptor).unwrap();
        let parsed: CellDescriptor = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, descriptor);

        // A descriptor missing optional sections parses with defaults
        let minimal = "\
apiVersion: mesh.cellc.dev/v1alpha1
kind: Cell
metadata:
  name: empty
spec:
  gateway:
    spec: {}
";
        let parsed: CellDescriptor = serde_yaml::from_str(minimal).unwrap();
        assert!(parsed.spec.services.is_empty());
        assert!(parsed.spec.security.is_none());
        assert!(parsed.metadata.annotations.is_empty());
    }
}
