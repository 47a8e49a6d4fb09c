//! 属性解析与字段绑定测试

use confsync::binder::{decode, BindMode, Binder, Configurable, FieldBinding, FieldKind};
use confsync::error::BindErrorKind;

#[derive(Debug, Clone, Default, PartialEq)]
struct ServerConfig {
    a: i32,
    b: bool,
    c: String,
    limit: i64,
    weight: f64,
    tags: Vec<String>,
}

impl Configurable for ServerConfig {
    fn bindings() -> Vec<FieldBinding<Self>> {
        vec![
            FieldBinding::int32("a", "a", |s: &mut Self, v| s.a = v).reloadable(),
            FieldBinding::boolean("b", "b", |s: &mut Self, v| s.b = v),
            FieldBinding::text("c", "c", |s: &mut Self, v| s.c = v).reloadable(),
            FieldBinding::int64("limit", "limit", |s: &mut Self, v| s.limit = v),
            FieldBinding::float64("weight", "weight", |s: &mut Self, v| s.weight = v),
            FieldBinding::unsupported("tags", "tags", "Vec<String>"),
        ]
    }
}

/// 解析并绑定全部键，返回失败字段数
fn bind_all(
    binder: &Binder<ServerConfig>,
    config: &mut ServerConfig,
    content: &str,
    mode: BindMode,
) -> usize {
    let map = decode(content).unwrap();
    map.iter()
        .map(|(key, value)| binder.bind(config, value, key, mode).len())
        .sum()
}

#[test]
fn test_properties_round_trip_into_struct() {
    let map = decode("a=1\nb=true\nc=hello\n").unwrap();
    assert_eq!(map.get("a").map(String::as_str), Some("1"));
    assert_eq!(map.get("b").map(String::as_str), Some("true"));
    assert_eq!(map.get("c").map(String::as_str), Some("hello"));

    let binder = Binder::<ServerConfig>::for_config();
    let mut config = ServerConfig::default();
    assert_eq!(bind_all(&binder, &mut config, "a=1\nb=true\nc=hello\n", BindMode::Initial), 0);

    assert_eq!(config.a, 1);
    assert!(config.b);
    assert_eq!(config.c, "hello");
}

#[test]
fn test_unsupported_field_reports_error_while_others_bind() {
    let binder = Binder::<ServerConfig>::for_config();

    let detected = binder.unsupported_fields();
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].field, "tags");

    let mut config = ServerConfig::default();
    let content = "limit=9000000000\nweight=0.75\ntags=x,y\n";
    let map = decode(content).unwrap();

    let mut errors = Vec::new();
    for (key, value) in &map {
        errors.extend(binder.bind(&mut config, value, key, BindMode::Initial));
    }

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field, "tags");
    assert_eq!(errors[0].key, "tags");
    assert_eq!(errors[0].kind, BindErrorKind::UnsupportedType("Vec<String>"));
    assert_eq!(config.limit, 9_000_000_000);
    assert_eq!(config.weight, 0.75);
    assert!(config.tags.is_empty());
}

#[test]
fn test_auto_mode_leaves_static_fields_alone() {
    let binder = Binder::<ServerConfig>::for_config();
    let mut config = ServerConfig::default();
    bind_all(&binder, &mut config, "a=1\nb=true\nc=first\n", BindMode::Initial);

    assert_eq!(bind_all(&binder, &mut config, "a=2\nb=false\nc=second\n", BindMode::Auto), 0);
    assert_eq!(config.a, 2);
    assert!(config.b);
    assert_eq!(config.c, "second");
}

#[test]
fn test_unknown_keys_are_ignored() {
    let binder = Binder::<ServerConfig>::for_config();
    let mut config = ServerConfig::default();

    assert!(!binder.has_key("unrelated"));
    assert_eq!(bind_all(&binder, &mut config, "unrelated=1\n", BindMode::Initial), 0);
    assert_eq!(config, ServerConfig::default());
}

#[test]
fn test_field_metadata() {
    let binding = FieldBinding::<ServerConfig>::float32("ratio", "ratio", |_, _| {}).reloadable();
    assert_eq!(binding.name(), "ratio");
    assert_eq!(binding.key(), "ratio");
    assert_eq!(binding.kind(), FieldKind::Float32);
    assert!(binding.is_reloadable());
}
