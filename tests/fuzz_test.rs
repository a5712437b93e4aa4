//! Black-box fuzzing of the input parsers and lookups.
//!
//! Random and edge-case inputs must produce values or errors, never panics.

mod common;

use common::ScriptedProvider;
use rand::Rng;
use rand::distributions::Alphanumeric;
use sproc_mapper::config::{DatabaseConfig, parse_cli_value};
use sproc_mapper::db::{ParameterSchemaCache, split_batches};
use sproc_mapper::error::DbError;
use sproc_mapper::mapping::{Entity, FieldRegistry, fill_from_form, fill_from_source};
use sproc_mapper::models::{
    Command, ExecuteResult, Parameter, ProviderKind, Value, calc_page_count,
    mask_connection_string,
};
use std::collections::HashMap;

/// Generate random string of given length
fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate various edge-case strings
fn edge_case_strings() -> Vec<String> {
    vec![
        String::new(),
        " ".to_string(),
        "\n\r\t".to_string(),
        "\0".to_string(),
        "üöÄ".repeat(100),
        "=".to_string(),
        "==;;==".to_string(),
        "name=".to_string(),
        "=Server=db".to_string(),
        "GO".to_string(),
        "go\ngo\nGO".to_string(),
        "Password=;Pwd".to_string(),
        "mysql://".to_string(),
        "sqlite:".to_string(),
        "user@host://x".to_string(),
        "'; DROP TABLE users--".to_string(),
        "1e999".to_string(),
        "-9223372036854775809".to_string(),
        "NaN".to_string(),
        "a".repeat(10000),
        random_string(100),
        random_string(1000),
        "\u{0000}\u{FFFF}".to_string(),
        "\x00\x01\x02".to_string(),
    ]
}

#[derive(Debug, Default)]
struct Profile {
    name: String,
    age: i32,
    active: bool,
    score: Option<f64>,
}

impl Entity for Profile {
    fn register(fields: &mut FieldRegistry<Self>) {
        fields.field("Name", |p| &p.name, |p| &mut p.name);
        fields.field("Age", |p| &p.age, |p| &mut p.age).allow_missing();
        fields.field("Active", |p| &p.active, |p| &mut p.active);
        fields.field("Score", |p| &p.score, |p| &mut p.score);
    }
}

#[test]
fn fuzz_database_config_parse() {
    for input in edge_case_strings() {
        if let Ok(config) = DatabaseConfig::parse(&input, None) {
            assert!(ProviderKind::from_connection_string(&config.connection_string).is_some());
        }
        let forced = DatabaseConfig::parse(&input, Some(ProviderKind::OleDb)).unwrap();
        assert_eq!(forced.provider, ProviderKind::OleDb);
    }
}

#[test]
fn fuzz_cli_values() {
    for input in edge_case_strings() {
        match parse_cli_value(&input) {
            Value::Float(f) => assert!(f.is_finite()),
            Value::String(s) => assert_eq!(s, input),
            _ => {}
        }
    }
    let n: i64 = rand::thread_rng().r#gen();
    assert_eq!(parse_cli_value(&n.to_string()), Value::Int(n));
}

#[test]
fn fuzz_split_batches() {
    for input in edge_case_strings() {
        for batch in split_batches(&input) {
            assert!(!batch.is_empty());
            assert!(!batch.trim().eq_ignore_ascii_case("go"));
        }
    }
}

#[test]
fn fuzz_mask_connection_string() {
    for input in edge_case_strings() {
        let secret = random_string(24);
        let masked = mask_connection_string(&format!("{};Password={}", input, secret));
        assert!(!masked.contains(&secret));
    }
}

#[test]
fn fuzz_page_count() {
    let mut rng = rand::thread_rng();
    for _ in 0..1000 {
        let total: i32 = rng.r#gen();
        let size: i32 = rng.r#gen();
        let pages = calc_page_count(total, size);
        if total <= 0 || size <= 0 {
            assert_eq!(pages, 0);
        } else {
            assert!(i64::from(pages) * i64::from(size) >= i64::from(total));
        }
    }
    assert_eq!(calc_page_count(i32::MAX, 1), i32::MAX);
}

#[test]
fn fuzz_parameter_lookup() {
    let mut command = Command::procedure("usp_Fuzz");
    command.parameters.push(Parameter::input("@Known", 1));
    for input in edge_case_strings() {
        if input.is_empty() || "@Known".ends_with(input.as_str()) {
            continue;
        }
        assert!(command.find_parameter("@", &input).is_err());
    }
}

#[test]
fn fuzz_form_binding() {
    for input in edge_case_strings() {
        let mut source = HashMap::new();
        for key in ["Name", "Age", "Active", "Score"] {
            source.insert(key.to_string(), input.clone());
        }
        let mut profile = Profile::default();
        fill_from_source(&mut profile, &source, true).unwrap();
        assert_eq!(profile.name, input.trim());

        let mut prefixed = Profile::default();
        fill_from_form(&mut prefixed, &source, "user.");
        assert!(prefixed.name.is_empty());
    }

    let mut profile = Profile::default();
    let empty: HashMap<String, String> = HashMap::new();
    assert!(matches!(
        fill_from_source(&mut profile, &empty, true),
        Err(DbError::KeyNotFound { .. })
    ));
}

#[test]
fn fuzz_procedure_names() {
    let provider = ScriptedProvider::new(|_| Ok(ExecuteResult::default()));
    let info = provider.info();
    let cache = ParameterSchemaCache::new();

    for name in edge_case_strings() {
        let result = tokio_test::block_on(cache.schema_for(&info, &name));
        assert!(matches!(result, Err(DbError::Database { .. })));
    }
    assert!(cache.is_empty());
}
