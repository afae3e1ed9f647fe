//! Dependency resolution and the metadata artifact
//!
//! Components declare dependencies on other cell images either as compact
//! `org/name:version` strings or as structured triples, each under an alias.
//! Resolution validates the compact form, enforces alias uniqueness across
//! the whole image, and produces both the annotation payload for the
//! descriptor and the `metadata.json` artifact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::image::{CellImage, Dependency, DependencyDecl};
use crate::Result;

/// Parse a compact `org/name:version` dependency string.
///
/// Exactly one `/` and one `:` in that order, all three fields non-empty.
pub fn parse_compact(raw: &str) -> Result<(String, String, String)> {
    let malformed = || {
        Error::configuration(format!(
            "invalid dependency '{}': expects <organization>/<cell-image>:<version>",
            raw
        ))
    };

    let (org, rest) = raw.split_once('/').ok_or_else(malformed)?;
    let (name, version) = rest.split_once(':').ok_or_else(malformed)?;
    if org.is_empty()
        || name.is_empty()
        || version.is_empty()
        || org.contains(':')
        || name.contains('/')
        || version.contains('/')
        || version.contains(':')
    {
        return Err(malformed());
    }
    Ok((org.to_string(), name.to_string(), version.to_string()))
}

/// Resolve every dependency declaration in the image.
///
/// Aliases are unique cell-image-wide; two components may depend on the same
/// image triple under different aliases, but reusing an alias is a
/// configuration error. Returns the dependencies in component-name order.
pub fn resolve(image: &CellImage) -> Result<Vec<Dependency>> {
    let mut seen: BTreeMap<&str, ()> = BTreeMap::new();
    let mut dependencies = Vec::new();

    for component in image.components() {
        for (alias, decl) in &component.dependencies {
            if seen.insert(alias.as_str(), ()).is_some() {
                return Err(Error::configuration(format!(
                    "duplicate dependency alias '{}'",
                    alias
                )));
            }
            let (org, name, version) = match decl {
                DependencyDecl::Compact(raw) => parse_compact(raw)?,
                DependencyDecl::Triple { org, name, version } => {
                    (org.clone(), name.clone(), version.clone())
                }
            };
            dependencies.push(Dependency {
                org,
                name,
                version,
                alias: alias.clone(),
            });
        }
    }
    Ok(dependencies)
}

/// One dependency entry in the metadata artifact
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    /// Organization publishing the depended-on image
    pub org: String,
    /// Image name
    pub name: String,
    /// Image version
    pub ver: String,
}

/// The `metadata.json` artifact: image identity, built container image tags,
/// aggregated labels, and the alias-keyed dependency map
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    /// Organization publishing the image
    pub org: String,
    /// Image name
    pub name: String,
    /// Image version
    pub ver: String,
    /// Container image tags built alongside this cell image.
    ///
    /// Always serialized, even when empty: consumers of the artifact rely on
    /// a stable key set.
    #[serde(default)]
    pub docker_images: Vec<String>,
    /// Labels aggregated across components
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Alias-keyed dependency map
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencyRef>,
}

/// Build the metadata artifact from the image and its resolved dependencies
pub fn generate(image: &CellImage, dependencies: &[Dependency]) -> ImageMetadata {
    let mut labels = BTreeMap::new();
    for component in image.components() {
        for (key, value) in &component.labels {
            labels.insert(key.clone(), value.clone());
        }
    }

    let dependencies = dependencies
        .iter()
        .map(|dep| {
            (
                dep.alias.clone(),
                DependencyRef {
                    org: dep.org.clone(),
                    name: dep.name.clone(),
                    ver: dep.version.clone(),
                },
            )
        })
        .collect();

    ImageMetadata {
        org: image.org.clone(),
        name: image.name.clone(),
        ver: image.version.clone(),
        docker_images: image.image_tags.clone(),
        labels,
        dependencies,
    }
}
