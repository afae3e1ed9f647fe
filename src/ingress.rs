//! Ingress variants and the ingress normalizer
//!
//! Every component exposes zero or more ingresses. [`Component::add_ingress`]
//! is the single entry point: it asserts the component's container port,
//! records the backend protocol, and collects the unauthenticated contexts
//! that later feed the gateway's security filter.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::image::{Component, Protocol};
use crate::Result;

/// One HTTP resource definition under an API context
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiDefinition {
    /// HTTP method ("GET", "POST", ...)
    pub method: String,
    /// Resource path relative to the context
    pub path: String,
}

/// HTTP API ingress
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpApi {
    /// API context path ("/hr", "/"); empty contexts are dropped by the
    /// gateway synthesizer
    pub context: String,
    /// Container port backing the API
    pub port: u16,
    /// Whether the API is published beyond the cell boundary
    pub global: bool,
    /// Whether callers must authenticate
    pub authenticate: bool,
    /// Resource definitions
    pub definitions: Vec<ApiDefinition>,
}

impl HttpApi {
    /// Create an authenticated, cell-local API
    pub fn new(context: impl Into<String>, port: u16) -> Self {
        Self {
            context: context.into(),
            port,
            global: false,
            authenticate: true,
            definitions: Vec::new(),
        }
    }

    /// Publish the API beyond the cell boundary
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    /// Allow unauthenticated callers
    pub fn unauthenticated(mut self) -> Self {
        self.authenticate = false;
        self
    }

    /// Add a resource definition
    pub fn with_definition(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.definitions.push(ApiDefinition {
            method: method.into(),
            path: path.into(),
        });
        self
    }
}

/// Raw TCP ingress
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpIngress {
    /// Port the gateway listens on
    pub gateway_port: u16,
    /// Container port the traffic is forwarded to
    pub backend_port: u16,
    /// Backend host; defaults to the component service name when absent
    pub backend_host: Option<String>,
}

impl TcpIngress {
    /// Create a TCP ingress mapping a gateway port to a container port
    pub fn new(gateway_port: u16, backend_port: u16) -> Self {
        Self {
            gateway_port,
            backend_port,
            backend_host: None,
        }
    }
}

/// gRPC ingress
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcIngress {
    /// Port the gateway listens on
    pub gateway_port: u16,
    /// Container port the traffic is forwarded to
    pub backend_port: u16,
    /// Backend host; defaults to the component service name when absent
    pub backend_host: Option<String>,
    /// Optional protobuf definition file reference
    pub proto_file: Option<String>,
}

impl GrpcIngress {
    /// Create a gRPC ingress mapping a gateway port to a container port
    pub fn new(gateway_port: u16, backend_port: u16) -> Self {
        Self {
            gateway_port,
            backend_port,
            backend_host: None,
            proto_file: None,
        }
    }
}

/// TLS key material for a web ingress
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM-encoded private key
    pub key: String,
    /// PEM-encoded certificate
    pub cert: String,
}

/// How the OIDC client authenticates to the identity provider.
///
/// Exactly one of the two registration styles must be configured;
/// [`OidcCredentials::from_parts`] enforces the rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OidcCredentials {
    /// Pre-registered client with a static secret
    ClientSecret(String),
    /// Dynamic client registration
    Dcr {
        /// Registration user
        user: String,
        /// Registration password
        password: String,
        /// Registration endpoint; provider default when absent
        url: Option<String>,
    },
}

impl OidcCredentials {
    /// Build credentials from the raw optional fields.
    ///
    /// A client secret wins when both styles are supplied. Neither present is
    /// a configuration error.
    pub fn from_parts(
        client_secret: Option<String>,
        dcr_user: Option<String>,
        dcr_password: Option<String>,
        dcr_url: Option<String>,
    ) -> Result<Self> {
        if let Some(secret) = client_secret {
            return Ok(OidcCredentials::ClientSecret(secret));
        }
        match (dcr_user, dcr_password) {
            (Some(user), Some(password)) => Ok(OidcCredentials::Dcr {
                user,
                password,
                url: dcr_url,
            }),
            _ => Err(Error::configuration(
                "OIDC configuration requires either a client secret or \
                 dynamic client registration credentials (user and password)",
            )),
        }
    }
}

/// OIDC single sign-on configuration for a web ingress
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Identity provider discovery endpoint
    pub discovery_url: String,
    /// Redirect URL registered with the provider
    pub redirect_url: String,
    /// Application base URL
    pub base_url: String,
    /// OIDC client id
    pub client_id: String,
    /// Path patterns requiring an authenticated session
    pub secure_paths: Vec<String>,
    /// Path patterns exempt from authentication
    pub non_secure_paths: Vec<String>,
    /// Claim used as the authenticated subject
    pub subject_claim: Option<String>,
    /// Client credentials
    pub credentials: OidcCredentials,
}

/// Web ingress: an externally-routed HTTP API with a virtual host, and
/// optionally TLS termination and OIDC sign-on at the gateway
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebIngress {
    /// Virtual host the gateway routes on
    pub vhost: String,
    /// Container port backing the site
    pub port: u16,
    /// Underlying HTTP API (context, definitions)
    pub api: HttpApi,
    /// TLS termination material
    pub tls: Option<TlsConfig>,
    /// OIDC sign-on configuration
    pub oidc: Option<OidcConfig>,
}

impl WebIngress {
    /// Create a web ingress serving `context` on `vhost`
    pub fn new(vhost: impl Into<String>, port: u16, context: impl Into<String>) -> Self {
        let context = context.into();
        Self {
            vhost: vhost.into(),
            port,
            api: HttpApi {
                context,
                port,
                global: true,
                authenticate: true,
                definitions: Vec::new(),
            },
            tls: None,
            oidc: None,
        }
    }
}

/// A single ingress of any kind
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ingress {
    /// HTTP API ingress
    HttpApi(HttpApi),
    /// Raw TCP ingress
    Tcp(TcpIngress),
    /// gRPC ingress
    Grpc(GrpcIngress),
    /// Web ingress
    Web(WebIngress),
}

impl Ingress {
    /// Container port this ingress asserts for its component
    pub fn container_port(&self) -> u16 {
        match self {
            Ingress::HttpApi(api) => api.port,
            Ingress::Tcp(tcp) => tcp.backend_port,
            Ingress::Grpc(grpc) => grpc.backend_port,
            Ingress::Web(web) => web.port,
        }
    }
}

/// Normalize an API context to a leading-slash form for the security filter
fn unsecured_context(context: &str) -> String {
    if context.starts_with('/') {
        context.to_string()
    } else {
        format!("/{}", context)
    }
}

impl Component {
    /// Attach an ingress to this component.
    ///
    /// The first ingress fixes the component's single container port; a later
    /// ingress asserting a different port is a configuration error. TCP and
    /// gRPC ingresses set the backend protocol and default their backend host
    /// to the component service name. Unauthenticated HTTP APIs contribute
    /// their context to the cell's unsecured paths.
    pub fn add_ingress(&mut self, ingress: Ingress) -> Result<()> {
        let port = ingress.container_port();
        match self.container_port {
            None => self.container_port = Some(port),
            Some(existing) if existing != port => {
                return Err(Error::configuration(format!(
                    "invalid container port {} for component '{}': \
                     multiple container ports are not supported (port {} already in use)",
                    port, self.name, existing
                )));
            }
            Some(_) => {}
        }

        match ingress {
            Ingress::HttpApi(api) => {
                if !api.authenticate && !api.context.is_empty() {
                    self.unsecured_paths.push(unsecured_context(&api.context));
                }
                self.http_apis.push(api);
            }
            Ingress::Tcp(mut tcp) => {
                self.protocol = Some(Protocol::Tcp);
                if tcp.backend_host.is_none() {
                    tcp.backend_host = Some(self.service_name.clone());
                }
                self.tcp_ingresses.push(tcp);
            }
            Ingress::Grpc(mut grpc) => {
                self.protocol = Some(Protocol::Grpc);
                if grpc.backend_host.is_none() {
                    grpc.backend_host = Some(self.service_name.clone());
                }
                self.grpc_ingresses.push(grpc);
            }
            Ingress::Web(web) => {
                if !web.api.authenticate && !web.api.context.is_empty() {
                    self.unsecured_paths
                        .push(unsecured_context(&web.api.context));
                }
                self.web_ingresses.push(web);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Component;

    // =========================================================================
    // Story: One Component, One Container Port
    // =========================================================================

    #[test]
    fn story_first_ingress_fixes_the_container_port() {
        let mut hr = Component::new("hr", "myorg/hr:1.0.0");
        hr.add_ingress(Ingress::HttpApi(HttpApi::new("hr-api", 8080)))
            .unwrap();
        assert_eq!(hr.container_port, Some(8080));

        // Same port, different ingress: fine
        hr.add_ingress(Ingress::HttpApi(HttpApi::new("payroll", 8080)))
            .unwrap();
        assert_eq!(hr.http_apis.len(), 2);
    }

    #[test]
    fn story_conflicting_container_port_is_fatal() {
        let mut hr = Component::new("hr", "myorg/hr:1.0.0");
        hr.add_ingress(Ingress::HttpApi(HttpApi::new("hr-api", 8080)))
            .unwrap();

        let err = hr
            .add_ingress(Ingress::Tcp(TcpIngress::new(31406, 9090)))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        let msg = err.to_string();
        assert!(msg.contains("9090"));
        assert!(msg.contains("8080"));
        assert!(msg.contains("'hr'"));

        // The failed ingress left no trace
        assert!(hr.tcp_ingresses.is_empty());
        assert_eq!(hr.protocol, None);
    }

    // =========================================================================
    // Story: TCP and gRPC Set the Backend Protocol and Host
    // =========================================================================

    #[test]
    fn story_tcp_ingress_defaults_backend_host_to_service_name() {
        let mut debug = Component::new("Debug_Tools", "myorg/debug:1.0.0");
        debug
            .add_ingress(Ingress::Tcp(TcpIngress::new(31406, 5432)))
            .unwrap();

        assert_eq!(debug.protocol, Some(Protocol::Tcp));
        assert_eq!(
            debug.tcp_ingresses[0].backend_host.as_deref(),
            Some("debug-tools")
        );
    }

    #[test]
    fn story_grpc_ingress_keeps_explicit_backend_host() {
        let mut grpc = GrpcIngress::new(31407, 50051);
        grpc.backend_host = Some("external-backend".to_string());
        grpc.proto_file = Some("service.proto".to_string());

        let mut component = Component::new("ledger", "myorg/ledger:1.0.0");
        component.add_ingress(Ingress::Grpc(grpc)).unwrap();

        assert_eq!(component.protocol, Some(Protocol::Grpc));
        assert_eq!(
            component.grpc_ingresses[0].backend_host.as_deref(),
            Some("external-backend")
        );
        assert_eq!(
            component.grpc_ingresses[0].proto_file.as_deref(),
            Some("service.proto")
        );
    }

    // =========================================================================
    // Story: Unauthenticated Contexts Feed the Security Filter
    // =========================================================================

    #[test]
    fn story_unauthenticated_contexts_are_recorded_with_leading_slash() {
        let mut portal = Component::new("portal", "myorg/portal:1.0.0");
        portal
            .add_ingress(Ingress::HttpApi(
                HttpApi::new("public", 8080).unauthenticated(),
            ))
            .unwrap();
        portal
            .add_ingress(Ingress::HttpApi(HttpApi::new("/docs", 8080).unauthenticated()))
            .unwrap();
        portal
            .add_ingress(Ingress::HttpApi(HttpApi::new("private", 8080)))
            .unwrap();

        assert_eq!(portal.unsecured_paths, vec!["/public", "/docs"]);
    }

    // =========================================================================
    // Story: OIDC Needs Exactly One Registration Style
    // =========================================================================

    #[test]
    fn story_oidc_client_secret_wins() {
        let creds = OidcCredentials::from_parts(
            Some("s3cret".to_string()),
            Some("admin".to_string()),
            Some("pw".to_string()),
            None,
        )
        .unwrap();
        assert_eq!(creds, OidcCredentials::ClientSecret("s3cret".to_string()));
    }

    #[test]
    fn story_oidc_dcr_requires_user_and_password() {
        let creds =
            OidcCredentials::from_parts(None, Some("admin".to_string()), Some("pw".to_string()),
                Some("https://idp/register".to_string()))
            .unwrap();
        assert!(matches!(creds, OidcCredentials::Dcr { .. }));

        let err = OidcCredentials::from_parts(None, Some("admin".to_string()), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("client secret"));

        let err = OidcCredentials::from_parts(None, None, None, None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn story_web_ingress_carries_vhost_tls_and_oidc() {
        let mut web = WebIngress::new("hello.example.com", 80, "/");
        web.tls = Some(TlsConfig {
            key: "KEY".to_string(),
            cert: "CERT".to_string(),
        });
        web.oidc = Some(OidcConfig {
            discovery_url: "https://idp/.well-known/openid-configuration".to_string(),
            redirect_url: "http://hello.example.com/_auth/callback".to_string(),
            base_url: "http://hello.example.com/".to_string(),
            client_id: "hello".to_string(),
            secure_paths: vec!["/admin".to_string()],
            non_secure_paths: vec!["/".to_string()],
            subject_claim: None,
            credentials: OidcCredentials::ClientSecret("s3cret".to_string()),
        });

        let mut component = Component::new("web-ui", "myorg/web:1.0.0");
        component.add_ingress(Ingress::Web(web)).unwrap();

        assert_eq!(component.container_port, Some(80));
        let stored = &component.web_ingresses[0];
        assert_eq!(stored.vhost, "hello.example.com");
        assert!(stored.tls.is_some());
        assert!(stored.oidc.is_some());
    }
}
