use serde_json::json;

use crate::filter::{FilterError, FilterPredicate, FnFilter, LdapFilter, ldap};
use crate::properties::Properties;

fn props() -> Properties {
    Properties::from_pairs([
        ("objectclass", json!(["org.example.Greeter", "org.example.Named"])),
        ("service.id", json!(7)),
        ("service.ranking", json!(10)),
        ("Language", json!("English")),
        ("enabled", json!(true)),
        ("motto", json!("Hello World")),
    ])
    .unwrap()
}

#[test]
fn test_equality_and_arrays() {
    let p = props();
    assert!(LdapFilter::parse("(objectclass=org.example.Greeter)").unwrap().matches(&p));
    assert!(LdapFilter::parse("(objectclass=org.example.Named)").unwrap().matches(&p));
    assert!(!LdapFilter::parse("(objectclass=org.example.Other)").unwrap().matches(&p));
    assert!(LdapFilter::parse("(service.id=7)").unwrap().matches(&p));
    assert!(LdapFilter::parse("(enabled=TRUE)").unwrap().matches(&p));
}

#[test]
fn test_composite_operators() {
    let p = props();
    let filter = LdapFilter::parse("(&(service.ranking>=5)(|(language=German)(language=English))(!(enabled=false)))").unwrap();
    assert!(filter.matches(&p));
    assert!(!LdapFilter::parse("(&(service.ranking>=11)(enabled=true))").unwrap().matches(&p));
    assert!(LdapFilter::parse("(service.ranking<=10)").unwrap().matches(&p));
}

#[test]
fn test_key_case_sensitivity() {
    let p = props();
    let filter = LdapFilter::parse("(language=English)").unwrap();
    assert!(filter.evaluate(&p, false));
    assert!(!filter.evaluate(&p, true));
}

#[test]
fn test_substring_presence_and_approx() {
    let p = props();
    assert!(LdapFilter::parse("(motto=Hello*)").unwrap().matches(&p));
    assert!(LdapFilter::parse("(motto=*World)").unwrap().matches(&p));
    assert!(LdapFilter::parse("(motto=H*o W*d)").unwrap().matches(&p));
    assert!(!LdapFilter::parse("(motto=*Moon*)").unwrap().matches(&p));
    assert!(LdapFilter::parse("(motto=*)").unwrap().matches(&p));
    assert!(!LdapFilter::parse("(missing=*)").unwrap().matches(&p));
    assert!(LdapFilter::parse("(motto~=helloworld)").unwrap().matches(&p));
}

#[test]
fn test_escaped_characters() {
    let p = Properties::from_pairs([("path", json!("a*(b)"))]).unwrap();
    assert!(LdapFilter::parse(r"(path=a\*\(b\))").unwrap().matches(&p));
}

#[test]
fn test_malformed_filters_report_position() {
    assert_eq!(LdapFilter::parse("  ").unwrap_err(), FilterError::Empty);
    for bad in ["objectclass=x", "(objectclass=x", "(&)", "(=x)", "(a=x))", "(a>=x*)", "(a!x)"] {
        match LdapFilter::parse(bad) {
            Err(FilterError::Syntax { expression, .. }) => assert_eq!(expression, bad),
            other => panic!("expected syntax error for {bad}, got {other:?}"),
        }
    }
}

#[test]
fn test_simple_terms_detection() {
    let keys = ["objectclass", "service.id"];
    let simple = ldap("(|(objectclass=A)(objectclass=B)(service.id=3))").unwrap();
    let terms = simple.simple_terms(&keys).unwrap();
    assert_eq!(terms[0], vec!["A".to_string(), "B".to_string()]);
    assert_eq!(terms[1], vec!["3".to_string()]);

    assert!(ldap("(objectclass=A*)").unwrap().simple_terms(&keys).is_none());
    assert!(ldap("(&(objectclass=A)(x=1))").unwrap().simple_terms(&keys).is_none());
    assert!(ldap("(other=1)").unwrap().simple_terms(&keys).is_none());
}

#[test]
fn test_simple_terms_skip_loose_literals() {
    let keys = ["objectclass", "service.id"];
    for expression in ["(objectclass= A)", "(service.id=01)", "(service.id=+1)", "(service.id=1.0)", "(objectclass=TRUE)"] {
        assert!(ldap(expression).unwrap().simple_terms(&keys).is_none(), "{expression} was indexed");
    }
    assert!(ldap("(|(objectclass=A)(service.id=07))").unwrap().simple_terms(&keys).is_none());
    assert!(ldap("(|(service.id=-3)(objectclass=true))").unwrap().simple_terms(&keys).is_some());
}

#[test]
fn test_fn_filter_adapter() {
    let filter = FnFilter::shared("ranked", |p: &Properties| p.get("service.ranking").is_some());
    assert!(filter.evaluate(&props(), true));
    assert_eq!(filter.expression(), "ranked");
    assert!(filter.simple_terms(&["objectclass"]).is_none());
}
