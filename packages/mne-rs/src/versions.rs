//! Dependency version pinning for build-matrix legs.
//!
//! Each CI leg pins the numeric and plotting stacks through `NUMPY`, `SCIPY`
//! and `MPL`. A leg fails before any test runs when the installed version of
//! a pinned package does not start with the pinned string.

use crate::error::{MneError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Packages whose installed version is checked, with their pin variable.
pub const PINNED_PACKAGES: &[(&str, &str)] = &[
    ("numpy", "NUMPY"),
    ("scipy", "SCIPY"),
    ("matplotlib", "MPL"),
];

/// One leg of the build matrix as described by its environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMatrix {
    pub python: String,
    pub deps: String,
    pub test_location: String,
    pub numpy: String,
    pub scipy: String,
    pub mpl: String,
    pub libpng: String,
    pub sklearn: String,
    pub pandas: String,
}

impl BuildMatrix {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys become empty strings.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).unwrap_or_default().trim().to_string();
        Self {
            python: get("PYTHON"),
            deps: get("DEPS"),
            test_location: get("TEST_LOCATION"),
            numpy: get("NUMPY"),
            scipy: get("SCIPY"),
            mpl: get("MPL"),
            libpng: get("LIBPNG"),
            sklearn: get("SKLEARN"),
            pandas: get("PANDAS"),
        }
    }

    pub fn pins(&self) -> Vec<VersionPin> {
        PINNED_PACKAGES
            .iter()
            .map(|&(package, env_var)| VersionPin {
                package: package.to_string(),
                env_var,
                expected: match env_var {
                    "NUMPY" => self.numpy.clone(),
                    "SCIPY" => self.scipy.clone(),
                    _ => self.mpl.clone(),
                },
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionPin {
    pub package: String,
    pub env_var: &'static str,
    pub expected: String,
}

impl VersionPin {
    pub fn is_active(&self) -> bool {
        !self.expected.is_empty()
    }

    pub fn matches(&self, installed: &str) -> bool {
        installed.trim().starts_with(self.expected.as_str())
    }
}

/// Parse `name=version` into its parts.
pub fn parse_installed(spec: &str) -> Result<(String, String)> {
    let (name, version) = spec.split_once('=').ok_or_else(|| {
        MneError::InvalidParameter(format!(
            "Invalid installed version '{}': expected 'package=version'",
            spec
        ))
    })?;
    let name = name.trim();
    let version = version.trim();
    if name.is_empty() || version.is_empty() {
        return Err(MneError::InvalidParameter(format!(
            "Invalid installed version '{}': package and version must be non-empty",
            spec
        )));
    }
    Ok((name.to_string(), version.to_string()))
}

/// Fail on the first active pin that the installed versions do not satisfy.
pub fn check_versions(pins: &[VersionPin], installed: &BTreeMap<String, String>) -> Result<()> {
    for pin in pins.iter().filter(|p| p.is_active()) {
        match installed.get(&pin.package) {
            Some(version) if pin.matches(version) => {
                log::info!("{} {} matches pin {}", pin.package, version, pin.expected);
            }
            Some(version) => {
                return Err(MneError::VersionMismatch {
                    package: pin.package.clone(),
                    expected: pin.expected.clone(),
                    found: version.clone(),
                });
            }
            None => {
                return Err(MneError::VersionMismatch {
                    package: pin.package.clone(),
                    expected: pin.expected.clone(),
                    found: "nothing (not installed)".to_string(),
                });
            }
        }
    }
    Ok(())
}
