//! Instance materializer
//!
//! A compiled descriptor carries build-time environment values, some of them
//! deliberately left empty for the runtime to fill in. Materializing an
//! instance loads the descriptor, overlays the caller's non-empty overrides
//! onto matching variable names per service, warns about any value that is
//! still empty, and rewrites the document in place. The caller then hands the
//! rewritten descriptor to the cluster.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, warn};

use crate::descriptor::CellDescriptor;
use crate::error::Error;
use crate::Result;

/// Per-component environment overrides, keyed by service name then variable
/// name. Empty override values are ignored: they cannot un-set a build-time
/// value.
pub type EnvOverrides = BTreeMap<String, BTreeMap<String, String>>;

/// Overlay runtime environment overrides onto the descriptor at `path` and
/// rewrite it in place.
///
/// A missing descriptor is reported with a hint, since the common cause is an
/// image that was never pulled or built.
pub fn materialize(path: &Path, overrides: &EnvOverrides) -> Result<()> {
    let raw = fs::read_to_string(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            Error::io(
                path,
                std::io::Error::new(
                    ErrorKind::NotFound,
                    "cell descriptor not found; was the image pulled or built?",
                ),
            )
        } else {
            Error::io(path, e)
        }
    })?;

    let mut descriptor: CellDescriptor = serde_yaml::from_str(&raw)?;
    overlay(&mut descriptor, overrides);

    let rewritten = serde_yaml::to_string(&descriptor)?;
    fs::write(path, rewritten).map_err(|e| Error::io(path, e))?;
    debug!(descriptor = %path.display(), "materialized instance descriptor");
    Ok(())
}

/// Apply non-empty overrides to matching env var names, then warn about every
/// value still empty
pub fn overlay(descriptor: &mut CellDescriptor, overrides: &EnvOverrides) {
    for service in &mut descriptor.spec.services {
        let service_overrides = overrides.get(&service.metadata.name);
        for env in &mut service.spec.container.env {
            if let Some(value) = service_overrides.and_then(|m| m.get(&env.name)) {
                if !value.is_empty() {
                    env.value = value.clone();
                }
            }
            if env.value.is_empty() {
                warn!(
                    service = %service.metadata.name,
                    env = %env.name,
                    "environment variable is still empty after overrides"
                );
            }
        }
    }
}
