//! Gateway synthesis and the build pipeline
//!
//! [`compile`] turns a validated [`CellImage`] into the three build artifacts
//! in memory; [`build`] writes them to the output layout the runtime expects:
//!
//! ```text
//! <output>/cell/<name>.yaml      descriptor
//! <output>/cell/metadata.json    image metadata
//! <output>/ref/reference.json    consumer reference contract
//! ```
//!
//! Nothing touches the filesystem until every validation has passed, so a
//! failed build never leaves a partial artifact tree behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::descriptor::{
    AutoscalingSpec, CellDescriptor, CellSpec, ContainerPort, ContainerSpec, DescriptorMeta,
    EnvVar, ExecAction, GatewayKind, GatewaySpec, GatewayTemplate, GrpcRoute, HttpGetAction,
    HttpHeader, HttpRoute, MetricSpec, OidcSpec, ProbeSpec, ResourceMetric, RouteDefinition,
    ScalePolicy, SecuritySpec, SecurityTemplate, ServiceSpec, ServiceTemplate, TcpRoute,
    TcpSocketAction, TemplateMeta, TlsSpec,
};
use crate::error::Error;
use crate::image::{sanitize_name, CellImage, Component, Probe, ProbeKind};
use crate::ingress::{OidcConfig, OidcCredentials, WebIngress};
use crate::{metadata, reference};
use crate::{
    Result, ANNOTATION_IMAGE_DEPENDENCIES, ANNOTATION_IMAGE_NAME, ANNOTATION_IMAGE_ORG,
    ANNOTATION_IMAGE_VERSION, CELL_ARTIFACT_DIR, DEFAULT_GATEWAY_PORT, DESCRIPTOR_API_VERSION,
    DESCRIPTOR_KIND, METADATA_FILE_NAME, REFERENCE_ARTIFACT_DIR, REFERENCE_FILE_NAME,
};

/// Everything a build produces, before anything is written
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledArtifacts {
    /// The cell descriptor document
    pub descriptor: CellDescriptor,
    /// The flat reference contract
    pub reference: BTreeMap<String, Value>,
    /// The metadata artifact
    pub metadata: metadata::ImageMetadata,
}

/// Paths of the artifacts a build wrote
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrittenArtifacts {
    /// `<output>/cell/<name>.yaml`
    pub descriptor: PathBuf,
    /// `<output>/ref/reference.json`
    pub reference: PathBuf,
    /// `<output>/cell/metadata.json`
    pub metadata: PathBuf,
}

/// The ingress kind that decides a component's (and, by precedence, the
/// cell's) gateway behavior
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum IngressClass {
    Grpc,
    Tcp,
    Http,
    Web,
}

impl IngressClass {
    /// Highest-precedence ingress class a component carries
    fn of(component: &Component) -> Option<Self> {
        if !component.web_ingresses.is_empty() {
            Some(IngressClass::Web)
        } else if !component.http_apis.is_empty() {
            Some(IngressClass::Http)
        } else if !component.tcp_ingresses.is_empty() {
            Some(IngressClass::Tcp)
        } else if !component.grpc_ingresses.is_empty() {
            Some(IngressClass::Grpc)
        } else {
            None
        }
    }

    fn gateway_kind(self) -> GatewayKind {
        match self {
            IngressClass::Http => GatewayKind::MicroGateway,
            _ => GatewayKind::EdgeProxy,
        }
    }
}

/// Compile a cell image into its artifacts without touching the filesystem
pub fn compile(image: &CellImage) -> Result<CompiledArtifacts> {
    let dependencies = metadata::resolve(image)?;
    // Composite images have no gateway; components talk to each other
    // directly, so there is nothing to route or filter
    let (gateway, security) = if image.composite {
        (GatewaySpec::default(), None)
    } else {
        (synthesize_gateway(image)?, security_template(image))
    };
    let services = image
        .components()
        .map(service_template)
        .collect::<Vec<_>>();

    let mut annotations = BTreeMap::new();
    annotations.insert(ANNOTATION_IMAGE_ORG.to_string(), image.org.clone());
    annotations.insert(ANNOTATION_IMAGE_NAME.to_string(), image.name.clone());
    annotations.insert(ANNOTATION_IMAGE_VERSION.to_string(), image.version.clone());
    annotations.insert(
        ANNOTATION_IMAGE_DEPENDENCIES.to_string(),
        serde_json::to_string(&dependencies)?,
    );

    let descriptor = CellDescriptor {
        api_version: DESCRIPTOR_API_VERSION.to_string(),
        kind: DESCRIPTOR_KIND.to_string(),
        metadata: DescriptorMeta {
            name: sanitize_name(&image.name),
            annotations,
        },
        spec: CellSpec {
            gateway: GatewayTemplate { spec: gateway },
            services,
            security,
        },
    };

    debug!(
        cell = %descriptor.metadata.name,
        components = image.component_count(),
        "compiled cell descriptor"
    );

    Ok(CompiledArtifacts {
        descriptor,
        reference: reference::generate(image),
        metadata: metadata::generate(image, &dependencies),
    })
}

/// Compile a cell image and write its artifacts under `output_root`
pub fn build(image: &CellImage, output_root: &Path) -> Result<WrittenArtifacts> {
    let artifacts = compile(image)?;

    let cell_dir = output_root.join(CELL_ARTIFACT_DIR);
    let ref_dir = output_root.join(REFERENCE_ARTIFACT_DIR);
    fs::create_dir_all(&cell_dir).map_err(|e| Error::io(&cell_dir, e))?;
    fs::create_dir_all(&ref_dir).map_err(|e| Error::io(&ref_dir, e))?;

    let descriptor_path = cell_dir.join(format!("{}.yaml", artifacts.descriptor.metadata.name));
    let reference_path = ref_dir.join(REFERENCE_FILE_NAME);
    let metadata_path = cell_dir.join(METADATA_FILE_NAME);

    let descriptor_yaml = serde_yaml::to_string(&artifacts.descriptor)?;
    fs::write(&descriptor_path, descriptor_yaml).map_err(|e| Error::io(&descriptor_path, e))?;

    let reference_json = serde_json::to_string_pretty(&artifacts.reference)?;
    fs::write(&reference_path, reference_json).map_err(|e| Error::io(&reference_path, e))?;

    let metadata_json = serde_json::to_string_pretty(&artifacts.metadata)?;
    fs::write(&metadata_path, metadata_json).map_err(|e| Error::io(&metadata_path, e))?;

    info!(
        cell = %artifacts.descriptor.metadata.name,
        descriptor = %descriptor_path.display(),
        "wrote cell image artifacts"
    );

    Ok(WrittenArtifacts {
        descriptor: descriptor_path,
        reference: reference_path,
        metadata: metadata_path,
    })
}

// =============================================================================
// Gateway Synthesis
// =============================================================================

/// Synthesize the gateway spec from every component's ingresses.
///
/// The gateway kind follows precedence web > http > tcp > grpc across the
/// whole image. Gateway-level host, TLS, and OIDC come from the single
/// component carrying a web ingress; a second such component is a
/// configuration error. Routes of every kind aggregate across components.
fn synthesize_gateway(image: &CellImage) -> Result<GatewaySpec> {
    let mut gateway = GatewaySpec::default();
    let mut web_owner: Option<&str> = None;

    for component in image.components() {
        if let Some(web) = component.web_ingresses.first() {
            if let Some(owner) = web_owner {
                return Err(Error::configuration(format!(
                    "components '{}' and '{}' both carry a web ingress; \
                     only one component may configure the gateway host",
                    owner, component.name
                )));
            }
            web_owner = Some(&component.name);
            if component.web_ingresses.len() > 1 {
                // Historical single-vhost limitation
                warn!(
                    component = %component.name,
                    "component declares multiple web ingresses; only the first is honored"
                );
            }
            apply_web_ingress(&mut gateway, component, web);
        }

        for api in &component.http_apis {
            if api.context.is_empty() {
                debug!(
                    component = %component.name,
                    "skipping HTTP API with empty context"
                );
                continue;
            }
            gateway.http.push(HttpRoute {
                context: api.context.clone(),
                backend: component.service_name.clone(),
                is_global: api.global,
                authenticate: api.authenticate,
                definitions: api
                    .definitions
                    .iter()
                    .map(|d| RouteDefinition {
                        method: d.method.clone(),
                        path: d.path.clone(),
                    })
                    .collect(),
            });
        }

        for tcp in &component.tcp_ingresses {
            gateway.tcp.push(TcpRoute {
                port: tcp.gateway_port,
                backend_port: tcp.backend_port,
                backend_host: tcp
                    .backend_host
                    .clone()
                    .unwrap_or_else(|| component.service_name.clone()),
            });
        }

        for grpc in &component.grpc_ingresses {
            gateway.grpc.push(GrpcRoute {
                port: grpc.gateway_port,
                backend_port: grpc.backend_port,
                backend_host: grpc
                    .backend_host
                    .clone()
                    .unwrap_or_else(|| component.service_name.clone()),
                proto_file: grpc.proto_file.clone(),
            });
        }
    }

    gateway.kind = image
        .components()
        .filter_map(IngressClass::of)
        .max()
        .map(IngressClass::gateway_kind);

    Ok(gateway)
}

/// Fold a component's first web ingress into the gateway-level fields
fn apply_web_ingress(gateway: &mut GatewaySpec, component: &Component, web: &WebIngress) {
    gateway.host = Some(web.vhost.clone());
    gateway.tls = web.tls.as_ref().map(|tls| TlsSpec {
        tls_key: tls.key.clone(),
        tls_cert: tls.cert.clone(),
    });
    gateway.oidc = web.oidc.as_ref().map(oidc_spec);
    gateway.http.push(HttpRoute {
        context: web.api.context.clone(),
        backend: component.service_name.clone(),
        is_global: web.api.global,
        authenticate: web.api.authenticate,
        definitions: web
            .api
            .definitions
            .iter()
            .map(|d| RouteDefinition {
                method: d.method.clone(),
                path: d.path.clone(),
            })
            .collect(),
    });
}

fn oidc_spec(oidc: &OidcConfig) -> OidcSpec {
    let (client_secret, dcr_user, dcr_password, dcr_url) = match &oidc.credentials {
        OidcCredentials::ClientSecret(secret) => (Some(secret.clone()), None, None, None),
        OidcCredentials::Dcr { user, password, url } => (
            None,
            Some(user.clone()),
            Some(password.clone()),
            url.clone(),
        ),
    };
    OidcSpec {
        discovery_url: oidc.discovery_url.clone(),
        redirect_url: oidc.redirect_url.clone(),
        base_url: oidc.base_url.clone(),
        client_id: oidc.client_id.clone(),
        secure_paths: oidc.secure_paths.clone(),
        non_secure_paths: oidc.non_secure_paths.clone(),
        subject_claim: oidc.subject_claim.clone(),
        client_secret,
        dcr_user,
        dcr_password,
        dcr_url,
    }
}

/// Union of every component's unsecured contexts, or `None` when empty
fn security_template(image: &CellImage) -> Option<SecurityTemplate> {
    let mut unsecured_paths: Vec<String> = Vec::new();
    for component in image.components() {
        for path in &component.unsecured_paths {
            if !unsecured_paths.contains(path) {
                unsecured_paths.push(path.clone());
            }
        }
    }
    if unsecured_paths.is_empty() {
        None
    } else {
        Some(SecurityTemplate {
            spec: SecuritySpec { unsecured_paths },
        })
    }
}

// =============================================================================
// Service Templates
// =============================================================================

/// Port the cell's internal routing uses for a component, decided by its
/// highest-precedence ingress
fn service_port(component: &Component) -> Option<u16> {
    match IngressClass::of(component)? {
        IngressClass::Web | IngressClass::Http => Some(DEFAULT_GATEWAY_PORT),
        IngressClass::Tcp => component.tcp_ingresses.first().map(|t| t.backend_port),
        IngressClass::Grpc => component.grpc_ingresses.first().map(|g| g.backend_port),
    }
}

fn service_template(component: &Component) -> ServiceTemplate {
    let env = component
        .env
        .iter()
        .map(|(name, value)| {
            if value.is_empty() {
                // Emitted anyway so the materializer can fill it in later
                warn!(
                    component = %component.name,
                    env = %name,
                    "environment variable has an empty value"
                );
            }
            EnvVar {
                name: name.clone(),
                value: value.clone(),
            }
        })
        .collect();

    ServiceTemplate {
        metadata: TemplateMeta {
            name: component.service_name.clone(),
            labels: component.labels.clone(),
        },
        spec: ServiceSpec {
            replicas: component.replicas,
            service_port: service_port(component),
            protocol: component.protocol.map(|p| p.as_str().to_string()),
            container: ContainerSpec {
                image: component.image.clone(),
                ports: component
                    .container_port
                    .map(|port| {
                        vec![ContainerPort {
                            container_port: port,
                        }]
                    })
                    .unwrap_or_default(),
                env,
                liveness_probe: component.liveness_probe.as_ref().map(probe_spec),
                readiness_probe: component.readiness_probe.as_ref().map(probe_spec),
            },
            autoscaling: component.autoscaling.as_ref().map(|scaling| AutoscalingSpec {
                overridable: scaling.overridable,
                policy: ScalePolicy {
                    min_replicas: scaling.min_replicas,
                    max_replicas: scaling.max_replicas,
                    metrics: scaling
                        .metrics
                        .iter()
                        .map(|m| MetricSpec {
                            metric_type: "Resource".to_string(),
                            resource: ResourceMetric {
                                name: m.name.clone(),
                                target_average_utilization: m.target_percentage,
                            },
                        })
                        .collect(),
                },
            }),
        },
    }
}

fn probe_spec(probe: &Probe) -> ProbeSpec {
    let mut spec = ProbeSpec {
        initial_delay_seconds: probe.initial_delay_seconds,
        period_seconds: probe.period_seconds,
        timeout_seconds: probe.timeout_seconds,
        failure_threshold: probe.failure_threshold,
        success_threshold: probe.success_threshold,
        ..Default::default()
    };
    match &probe.kind {
        ProbeKind::TcpSocket { port } => {
            spec.tcp_socket = Some(TcpSocketAction { port: *port });
        }
        ProbeKind::HttpGet {
            path,
            port,
            headers,
        } => {
            spec.http_get = Some(HttpGetAction {
                path: path.clone(),
                port: *port,
                http_headers: headers
                    .iter()
                    .map(|(name, value)| HttpHeader {
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            });
        }
        ProbeKind::Exec { command } => {
            spec.exec = Some(ExecAction {
                command: command.clone(),
            });
        }
    }
    spec
}
