//! Longest-prefix semantics across nested and adjacent networks.

use matchy::{Database, DatabaseBuilder, Error, Value};

fn build(entries: &[(&str, &str)]) -> Database {
    let mut builder = DatabaseBuilder::new();
    for (key, tag) in entries {
        builder
            .add_entry_json(key, &format!(r#"{{"tag":"{tag}"}}"#))
            .unwrap();
    }
    Database::from_bytes(builder.build().unwrap()).unwrap()
}

fn tag_of(db: &Database, key: &str) -> Option<(String, u16)> {
    let answer = db.query(key).unwrap();
    if !answer.found {
        return None;
    }
    match answer.entry().unwrap().navigate(&["tag"]).unwrap() {
        Value::String(s) => Some((s, answer.prefix_len)),
        other => panic!("expected string tag, got {other:?}"),
    }
}

#[test]
fn nested_prefix_chain() {
    let db = build(&[
        ("10.0.0.0/8", "p8"),
        ("10.128.0.0/9", "p9"),
        ("10.128.0.0/16", "p16"),
        ("10.128.64.0/24", "p24"),
        ("10.128.64.7", "p32"),
    ]);

    assert_eq!(tag_of(&db, "10.128.64.7"), Some(("p32".into(), 32)));
    assert_eq!(tag_of(&db, "10.128.64.8"), Some(("p24".into(), 24)));
    assert_eq!(tag_of(&db, "10.128.65.1"), Some(("p16".into(), 16)));
    assert_eq!(tag_of(&db, "10.129.0.1"), Some(("p9".into(), 9)));
    assert_eq!(tag_of(&db, "10.127.0.1"), Some(("p8".into(), 8)));
    assert_eq!(tag_of(&db, "11.0.0.1"), None);
}

#[test]
fn insertion_order_does_not_matter() {
    let forward = build(&[("172.16.0.0/12", "wide"), ("172.16.5.0/24", "narrow")]);
    let reverse = build(&[("172.16.5.0/24", "narrow"), ("172.16.0.0/12", "wide")]);

    for db in [&forward, &reverse] {
        assert_eq!(tag_of(db, "172.16.5.9"), Some(("narrow".into(), 24)));
        assert_eq!(tag_of(db, "172.16.9.9"), Some(("wide".into(), 12)));
    }
}

#[test]
fn adjacent_networks_do_not_bleed() {
    let db = build(&[("192.0.2.0/25", "low"), ("192.0.2.128/25", "high")]);
    assert_eq!(tag_of(&db, "192.0.2.1"), Some(("low".into(), 25)));
    assert_eq!(tag_of(&db, "192.0.2.127"), Some(("low".into(), 25)));
    assert_eq!(tag_of(&db, "192.0.2.128"), Some(("high".into(), 25)));
    assert_eq!(tag_of(&db, "192.0.2.255"), Some(("high".into(), 25)));
    assert_eq!(tag_of(&db, "192.0.3.1"), None);
}

#[test]
fn empty_subtree_means_not_found_not_ancestor() {
    // A /24 under a larger uncovered space: addresses outside the /24 hit
    // nothing even though they share high bits with it.
    let db = build(&[("198.51.100.0/24", "only")]);
    assert_eq!(tag_of(&db, "198.51.100.200"), Some(("only".into(), 24)));
    assert_eq!(tag_of(&db, "198.51.101.1"), None);
    assert_eq!(tag_of(&db, "198.51.99.255"), None);
}

#[test]
fn v6_prefixes_and_mapped_v4_coexist() {
    let db = {
        let mut builder = DatabaseBuilder::new();
        builder
            .add_entry_json("2001:db8::/32", r#"{"tag":"doc"}"#)
            .unwrap();
        builder
            .add_entry_json("2001:db8:abcd::/48", r#"{"tag":"doc48"}"#)
            .unwrap();
        builder.add_entry_json("8.8.8.8", r#"{"tag":"dns"}"#).unwrap();
        Database::from_bytes(builder.build().unwrap()).unwrap()
    };

    let answer = db.query("2001:db8:abcd::1").unwrap();
    assert_eq!(answer.prefix_len, 48);
    let answer = db.query("2001:db8:ffff::1").unwrap();
    assert_eq!(answer.prefix_len, 32);

    // v4 queries against the shared trie come back in v4 terms.
    let answer = db.query("8.8.8.8").unwrap();
    assert!(answer.found);
    assert_eq!(answer.prefix_len, 32);

    let answer = db.query("2002::1").unwrap();
    assert!(!answer.found);
}

#[test]
fn v4_only_database_rejects_v6_keys() {
    let db = build(&[("10.0.0.0/8", "net")]);
    let err = db.query("2001:db8::1").unwrap_err();
    assert!(matches!(err, Error::Ipv6LookupInIpv4Database(_)));
}

#[test]
fn host_routes_inside_covering_network() {
    let db = build(&[("0.0.0.0/1", "half"), ("127.0.0.1", "localhost")]);
    assert_eq!(tag_of(&db, "127.0.0.1"), Some(("localhost".into(), 32)));
    assert_eq!(tag_of(&db, "127.0.0.2"), Some(("half".into(), 1)));
    assert_eq!(tag_of(&db, "128.0.0.1"), None);
}
