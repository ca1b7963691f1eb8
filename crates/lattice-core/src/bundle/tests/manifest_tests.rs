use semver::Version;
use serde_json::json;

use crate::bundle::BundleError;
use crate::bundle::manifest::{BundleManifest, parse_version};
use crate::properties::Properties;

fn headers(value: serde_json::Value) -> Properties {
    Properties::from_json(&value).expect("valid header object")
}

fn invalid_reason(value: serde_json::Value) -> String {
    match BundleManifest::parse("test:bundle", headers(value)) {
        Err(BundleError::InvalidManifest { location, reason }) => {
            assert_eq!(location, "test:bundle");
            reason
        }
        other => panic!("expected an invalid manifest, got {other:?}"),
    }
}

#[test]
fn test_minimal_manifest_defaults() {
    let manifest = BundleManifest::parse("test:bundle", headers(json!({ "bundle.symbolic_name": "  org.example.min " })))
        .unwrap();
    assert_eq!(manifest.symbolic_name, "org.example.min");
    assert_eq!(manifest.version, Version::new(0, 0, 0));
    assert!(!manifest.activator);
    assert!(manifest.requires.is_empty());
}

#[test]
fn test_full_manifest() {
    let manifest = BundleManifest::parse(
        "test:bundle",
        headers(json!({
            "Bundle.Symbolic_Name": "org.example.full",
            "bundle.version": "2.1",
            "bundle.activator": true,
            "bundle.requires": ["org.example.a", "org.example.b"],
            "custom.header": 7
        })),
    )
    .unwrap();
    assert_eq!(manifest.symbolic_name, "org.example.full");
    assert_eq!(manifest.version, Version::new(2, 1, 0));
    assert!(manifest.activator);
    assert_eq!(manifest.requires, vec!["org.example.a".to_string(), "org.example.b".to_string()]);
    assert_eq!(manifest.headers.get("custom.header"), Some(&json!(7)));
}

#[test]
fn test_single_requirement_as_string() {
    let manifest = BundleManifest::parse(
        "test:bundle",
        headers(json!({ "bundle.symbolic_name": "x", "bundle.requires": "org.example.dep" })),
    )
    .unwrap();
    assert_eq!(manifest.requires, vec!["org.example.dep".to_string()]);
}

#[test]
fn test_rejected_headers() {
    assert!(invalid_reason(json!({})).contains("missing mandatory header"));
    assert!(invalid_reason(json!({ "bundle.symbolic_name": "   " })).contains("is empty"));
    assert!(invalid_reason(json!({ "bundle.symbolic_name": 5 })).contains("must be a string"));
    assert!(invalid_reason(json!({ "bundle.symbolic_name": "x", "bundle.version": 1 })).contains("must be a string"));
    assert!(invalid_reason(json!({ "bundle.symbolic_name": "x", "bundle.version": "one" })).contains("invalid"));
    assert!(invalid_reason(json!({ "bundle.symbolic_name": "x", "bundle.activator": "yes" })).contains("boolean"));
    assert!(invalid_reason(json!({ "bundle.symbolic_name": "x", "bundle.requires": [1] })).contains("must be strings"));
    assert!(invalid_reason(json!({ "bundle.symbolic_name": "x", "bundle.requires": {} })).contains("must be a list"));
}

#[test]
fn test_parse_version_padding() {
    assert_eq!(parse_version("1").unwrap(), Version::new(1, 0, 0));
    assert_eq!(parse_version("1.2").unwrap(), Version::new(1, 2, 0));
    assert_eq!(parse_version(" 1.2.3 ").unwrap(), Version::new(1, 2, 3));
    assert_eq!(parse_version("1-beta").unwrap(), Version::parse("1.0.0-beta").unwrap());
    assert_eq!(parse_version("1.2+build.5").unwrap(), Version::parse("1.2.0+build.5").unwrap());
    assert!(parse_version("").is_err());
    assert!(parse_version("a.b").is_err());
}
