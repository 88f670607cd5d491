//! End-to-end scenarios: build a database, save it, reopen it through the
//! memory mapping, and query it.

use matchy::{Database, DatabaseBuilder, Error, OpenOptions, Value};
use tempfile::tempdir;

fn open_roundtrip(builder: &DatabaseBuilder) -> Database {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    builder.save(&path).unwrap();
    Database::open(&path).unwrap()
}

#[test]
fn country_payload_roundtrip() {
    let mut builder = DatabaseBuilder::new();
    builder
        .add_entry_json("8.8.8.8", r#"{"country":{"iso_code":"US"}}"#)
        .unwrap();
    let db = open_roundtrip(&builder);

    let answer = db.query("8.8.8.8").unwrap();
    assert!(answer.found);
    assert_eq!(answer.prefix_len, 32);

    let entry = answer.entry().unwrap();
    match entry.navigate(&["country", "iso_code"]).unwrap() {
        Value::String(s) => {
            assert_eq!(s, "US");
            assert_eq!(s.len(), 2);
        }
        other => panic!("expected string, got {other:?}"),
    }
}

#[test]
fn double_payload_precision() {
    let mut builder = DatabaseBuilder::new();
    builder
        .add_entry_json("8.8.8.8", r#"{"location":{"latitude":37.751}}"#)
        .unwrap();
    let db = open_roundtrip(&builder);

    let entry = db.query("8.8.8.8").unwrap().entry().unwrap();
    match entry.navigate(&["location", "latitude"]).unwrap() {
        Value::Double(d) => assert!((d - 37.751).abs() < 1e-3),
        other => panic!("expected double, got {other:?}"),
    }
}

#[test]
fn nested_names_map() {
    let mut builder = DatabaseBuilder::new();
    builder
        .add_entry_json("8.8.8.8", r#"{"country":{"names":{"en":"United States"}}}"#)
        .unwrap();
    let db = open_roundtrip(&builder);

    let entry = db.query("8.8.8.8").unwrap().entry().unwrap();
    assert_eq!(
        entry.navigate(&["country", "names", "en"]).unwrap(),
        Value::String("United States".to_string())
    );
}

#[test]
fn boolean_payloads() {
    let mut builder = DatabaseBuilder::new();
    builder
        .add_entry_json("10.0.0.1", r#"{"is_vpn":true,"is_proxy":false}"#)
        .unwrap();
    let db = open_roundtrip(&builder);

    let entry = db.query("10.0.0.1").unwrap().entry().unwrap();
    assert_eq!(entry.navigate(&["is_vpn"]).unwrap(), Value::Bool(true));
    assert_eq!(entry.navigate(&["is_proxy"]).unwrap(), Value::Bool(false));
}

#[test]
fn pattern_match_set() {
    let mut builder = DatabaseBuilder::new();
    for pattern in ["*.txt", "*.log", "test_*"] {
        builder
            .add_entry_json(pattern, &format!(r#"{{"pattern":"{pattern}"}}"#))
            .unwrap();
    }
    let db = open_roundtrip(&builder);

    let hits = db.query_all_patterns("test_file.txt").unwrap();
    let matched: Vec<&str> = hits.iter().map(|h| h.pattern).collect();
    assert_eq!(matched.len(), 2);
    assert!(matched.contains(&"*.txt"));
    assert!(matched.contains(&"test_*"));
}

#[test]
fn pattern_miss_and_infix_match() {
    let mut builder = DatabaseBuilder::new();
    for pattern in ["*.txt", "hello", "*world*"] {
        builder
            .add_entry_json(pattern, r#"{"hit":true}"#)
            .unwrap();
    }
    let db = open_roundtrip(&builder);

    assert!(db.query_all_patterns("nothing.rs").unwrap().is_empty());

    let hits = db.query_all_patterns("hello_world").unwrap();
    let matched: Vec<&str> = hits.iter().map(|h| h.pattern).collect();
    assert_eq!(matched, vec!["*world*"]);
}

#[test]
fn missing_navigate_path() {
    let mut builder = DatabaseBuilder::new();
    builder
        .add_entry_json("8.8.8.8", r#"{"country":{"iso_code":"US"}}"#)
        .unwrap();
    let db = open_roundtrip(&builder);

    let entry = db.query("8.8.8.8").unwrap().entry().unwrap();
    let err = entry.navigate(&["nonexistent", "path"]).unwrap_err();
    assert!(matches!(err, Error::LookupPathInvalid(_)));
    assert_eq!(err.status(), matchy::Status::LookupPathInvalid);
}

#[test]
fn json_roundtrip_is_semantically_equal() {
    let payload = r#"{
        "name": "test",
        "score": 0.5,
        "count": 3,
        "tags": ["a", "b"],
        "nested": {"deep": {"flag": true}}
    }"#;
    let mut builder = DatabaseBuilder::new();
    builder.add_entry_json("192.0.2.1", payload).unwrap();
    let db = open_roundtrip(&builder);

    let json = db
        .query("192.0.2.1")
        .unwrap()
        .entry()
        .unwrap()
        .to_json()
        .unwrap();
    let out: serde_json::Value = serde_json::from_str(&json).unwrap();
    let expected: serde_json::Value = serde_json::from_str(payload).unwrap();
    // Numbers come back as doubles; 3 == 3.0 under serde_json's equality
    // only when shapes agree, so compare field by field.
    assert_eq!(out["name"], expected["name"]);
    assert_eq!(out["score"].as_f64(), expected["score"].as_f64());
    assert_eq!(out["count"].as_f64(), expected["count"].as_f64());
    assert_eq!(out["tags"], expected["tags"]);
    assert_eq!(out["nested"], expected["nested"]);
}

#[test]
fn navigate_is_idempotent() {
    let mut builder = DatabaseBuilder::new();
    builder
        .add_entry_json("8.8.8.8", r#"{"a":{"b":[1,2,3]}}"#)
        .unwrap();
    let db = open_roundtrip(&builder);
    let entry = db.query("8.8.8.8").unwrap().entry().unwrap();

    let first = entry.navigate(&["a", "b", "2"]).unwrap();
    for _ in 0..5 {
        assert_eq!(entry.navigate(&["a", "b", "2"]).unwrap(), first);
    }
}

#[test]
fn builds_are_deterministic_with_pinned_epoch() {
    let build = |order: &[(&str, &str)]| {
        let mut builder = DatabaseBuilder::new().with_build_epoch(1_750_000_000);
        for (key, json) in order {
            builder.add_entry_json(key, json).unwrap();
        }
        builder.build().unwrap()
    };

    let a = build(&[
        ("8.8.8.0/24", r#"{"t":"dns"}"#),
        ("*.txt", r#"{"t":"text"}"#),
        ("10.0.0.0/8", r#"{"t":"net"}"#),
    ]);
    let b = build(&[
        ("10.0.0.0/8", r#"{"t":"net"}"#),
        ("8.8.8.0/24", r#"{"t":"dns"}"#),
        ("*.txt", r#"{"t":"text"}"#),
    ]);
    assert_eq!(a, b);
}

#[test]
fn identical_payloads_share_storage() {
    let payload = r#"{"shared":"payload","with":["some","bulk"]}"#;
    let mut small = DatabaseBuilder::new().with_build_epoch(1);
    small.add_entry_json("1.1.1.1", payload).unwrap();
    small.add_entry_json("2.2.2.2", payload).unwrap();

    let mut distinct = DatabaseBuilder::new().with_build_epoch(1);
    distinct.add_entry_json("1.1.1.1", payload).unwrap();
    distinct
        .add_entry_json("2.2.2.2", r#"{"unique":"payload","with":["other","bulk"]}"#)
        .unwrap();

    // Shared payloads collapse to one copy, so the file must be smaller.
    assert!(small.build().unwrap().len() < distinct.build().unwrap().len());
}

#[test]
fn cache_capacity_zero_and_default_agree() {
    let mut builder = DatabaseBuilder::new();
    builder.add_entry_json("8.8.8.0/24", r#"{"t":"a"}"#).unwrap();
    builder.add_entry_json("8.0.0.0/8", r#"{"t":"b"}"#).unwrap();
    let bytes = builder.build().unwrap();

    let with_cache = Database::from_bytes(bytes.clone()).unwrap();
    let without_cache = Database::from_bytes_with_options(
        bytes,
        OpenOptions {
            cache_capacity: 0,
            trusted: false,
        },
    )
    .unwrap();

    for key in ["8.8.8.8", "8.1.1.1", "9.9.9.9", "8.8.8.8", "8.1.1.1"] {
        let a = with_cache.query(key).unwrap();
        let b = without_cache.query(key).unwrap();
        assert_eq!(a.found, b.found);
        assert_eq!(a.prefix_len, b.prefix_len);
    }
}

#[test]
fn mixed_database_serves_both_query_styles() {
    let mut builder = DatabaseBuilder::new();
    builder
        .add_entry_json("203.0.113.0/24", r#"{"kind":"prefix"}"#)
        .unwrap();
    builder
        .add_entry_json("*.example.com", r#"{"kind":"pattern"}"#)
        .unwrap();
    let db = open_roundtrip(&builder);

    assert!(db.has_trie_data());
    assert!(db.has_pattern_data());

    let answer = db.query("203.0.113.99").unwrap();
    assert!(answer.found);
    assert_eq!(answer.prefix_len, 24);

    let answer = db.query("www.example.com").unwrap();
    assert!(answer.found);
    assert_eq!(answer.prefix_len, 0);

    let answer = db.query("www.example.org").unwrap();
    assert!(!answer.found);
}

#[test]
fn corrupted_file_is_rejected_on_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("corrupt.db");
    let mut builder = DatabaseBuilder::new();
    builder.add_entry_json("1.2.3.4", r#"{"x":1}"#).unwrap();
    builder.save(&path).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    assert!(Database::open(&path).is_err());
}

#[test]
fn pattern_ids_are_stable_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("patterns.db");
    let mut builder = DatabaseBuilder::new();
    for pattern in ["zz*", "aa*", "mm*"] {
        builder.add_entry_json(pattern, r#"{"x":1}"#).unwrap();
    }
    builder.save(&path).unwrap();

    let first: Vec<String> = {
        let db = Database::open(&path).unwrap();
        (0..db.pattern_count() as u32)
            .map(|id| db.pattern_string(id).unwrap().to_string())
            .collect()
    };
    let second: Vec<String> = {
        let db = Database::open(&path).unwrap();
        (0..db.pattern_count() as u32)
            .map(|id| db.pattern_string(id).unwrap().to_string())
            .collect()
    };
    assert_eq!(first, second);
    assert_eq!(first, vec!["aa*", "mm*", "zz*"]);
}
