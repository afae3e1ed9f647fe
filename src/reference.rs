//! Reference contract generator
//!
//! A consuming cell needs to know how to reach this cell's gateway without
//! seeing the full descriptor. The reference artifact is a flat JSON map of
//! stable keys to URLs and ports, with the instance name left as a
//! placeholder to be substituted when an instance is materialized.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::image::CellImage;
use crate::{
    DEFAULT_GATEWAY_PORT, DEFAULT_GATEWAY_PROTOCOL, GATEWAY_SERVICE_SUFFIX,
    INSTANCE_NAME_PLACEHOLDER,
};

/// Key for the gateway host entry
pub const GATEWAY_HOST_KEY: &str = "gateway_host";

/// Suffix for HTTP API URL keys
const API_URL_SUFFIX: &str = "_api_url";
/// Suffix for TCP port keys
const TCP_PORT_SUFFIX: &str = "_tcp_port";
/// Suffix for gRPC port keys
const GRPC_PORT_SUFFIX: &str = "_grpc_port";

/// Generate the reference map for a cell image.
///
/// HTTP APIs with a non-empty context contribute `<context>_api_url` entries
/// (the component name stands in for the root context `/`), TCP and gRPC
/// ingresses contribute `<component>_tcp_port` / `<component>_grpc_port`
/// entries with the gateway-facing port, and a constant `gateway_host` entry
/// names the gateway service of the yet-unnamed instance. Empty-context APIs
/// get no gateway route, so they get no reference entry either.
pub fn generate(image: &CellImage) -> BTreeMap<String, Value> {
    let mut reference = BTreeMap::new();
    let gateway_host = format!("{}{}", INSTANCE_NAME_PLACEHOLDER, GATEWAY_SERVICE_SUFFIX);

    for component in image.components() {
        for api in &component.http_apis {
            if api.context.is_empty() {
                continue;
            }
            let context = api.context.trim_start_matches('/');
            let key_stem = if context.is_empty() {
                component.name.as_str()
            } else {
                context
            };
            let url = collapse_double_slashes(&format!(
                "{}://{}:{}/{}",
                DEFAULT_GATEWAY_PROTOCOL, gateway_host, DEFAULT_GATEWAY_PORT, context
            ));
            reference.insert(format!("{}{}", key_stem, API_URL_SUFFIX), Value::from(url));
        }
        for tcp in &component.tcp_ingresses {
            reference.insert(
                format!("{}{}", component.name, TCP_PORT_SUFFIX),
                Value::from(tcp.gateway_port),
            );
        }
        for grpc in &component.grpc_ingresses {
            reference.insert(
                format!("{}{}", component.name, GRPC_PORT_SUFFIX),
                Value::from(grpc.gateway_port),
            );
        }
    }

    reference.insert(GATEWAY_HOST_KEY.to_string(), Value::from(gateway_host));
    reference
}

/// Collapse `//` runs everywhere except immediately after the URL scheme
fn collapse_double_slashes(url: &str) -> String {
    let (scheme, rest) = match url.find("://") {
        Some(idx) => url.split_at(idx + 3),
        None => ("", url),
    };
    let mut collapsed = String::with_capacity(rest.len());
    let mut prev_slash = false;
    for c in rest.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        collapsed.push(c);
    }
    format!("{}{}", scheme, collapsed)
}
