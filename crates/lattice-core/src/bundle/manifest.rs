use semver::Version;
use serde_json::Value;

use crate::bundle::BundleError;
use crate::kernel::constants::{BUNDLE_ACTIVATOR, BUNDLE_REQUIRES, BUNDLE_SYMBOLIC_NAME, BUNDLE_VERSION};
use crate::properties::Properties;

/// The validated part of a bundle's manifest headers.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleManifest {
    /// Mandatory, non-empty.
    pub symbolic_name: String,
    /// `0.0.0` when the header is absent.
    pub version: Version,
    /// Whether the module exports an activator.
    pub activator: bool,
    /// Symbolic names that must be installed for the bundle to resolve.
    pub requires: Vec<String>,
    /// All headers, including the ones above.
    pub headers: Properties,
}

impl BundleManifest {
    pub fn parse(location: &str, headers: Properties) -> Result<Self, BundleError> {
        let invalid = |reason: String| BundleError::InvalidManifest { location: location.to_string(), reason };

        let symbolic_name = match headers.get(BUNDLE_SYMBOLIC_NAME) {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
            Some(Value::String(_)) => return Err(invalid(format!("'{BUNDLE_SYMBOLIC_NAME}' is empty"))),
            Some(other) => return Err(invalid(format!("'{BUNDLE_SYMBOLIC_NAME}' must be a string, found {other}"))),
            None => return Err(invalid(format!("missing mandatory header '{BUNDLE_SYMBOLIC_NAME}'"))),
        };

        let version = match headers.get(BUNDLE_VERSION) {
            None | Some(Value::Null) => Version::new(0, 0, 0),
            Some(Value::String(text)) => {
                parse_version(text).map_err(|e| invalid(format!("invalid '{BUNDLE_VERSION}' '{text}': {e}")))?
            }
            Some(other) => return Err(invalid(format!("'{BUNDLE_VERSION}' must be a string, found {other}"))),
        };

        let activator = match headers.get(BUNDLE_ACTIVATOR) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => return Err(invalid(format!("'{BUNDLE_ACTIVATOR}' must be a boolean, found {other}"))),
        };

        let requires = match headers.get(BUNDLE_REQUIRES) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(name)) => vec![name.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid(format!("'{BUNDLE_REQUIRES}' entries must be strings, found {item}")))
                })
                .collect::<Result<_, _>>()?,
            Some(other) => return Err(invalid(format!("'{BUNDLE_REQUIRES}' must be a list, found {other}"))),
        };

        Ok(Self { symbolic_name, version, activator, requires, headers })
    }
}

/// Parses a version, padding missing minor and patch parts with zero.
pub fn parse_version(text: &str) -> Result<Version, semver::Error> {
    let text = text.trim();
    let (core, rest) = match text.find(['-', '+']) {
        Some(idx) => text.split_at(idx),
        None => (text, ""),
    };
    let padded = match core.split('.').count() {
        1 => format!("{core}.0.0{rest}"),
        2 => format!("{core}.0{rest}"),
        _ => text.to_string(),
    };
    Version::parse(&padded)
}
