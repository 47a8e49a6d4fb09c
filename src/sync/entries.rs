//! 配置项读取与绑定的公共逻辑

use crate::binder::{decode, BindMode, Binder, PropertyMap};
use crate::error::{BindError, EntryError};
use crate::fetch::PROPERTIES_SUFFIX;
use std::path::Path;

/// 读取下载目录中的属性文件
///
/// 非 `.properties` 文件不做解析，返回空表。
pub(crate) async fn read_properties(dir: &Path, name: &str) -> Result<PropertyMap, EntryError> {
    if !name.ends_with(PROPERTIES_SUFFIX) {
        return Ok(PropertyMap::new());
    }

    let content = tokio::fs::read_to_string(dir.join(name))
        .await
        .map_err(|source| EntryError::Io {
            name: name.to_string(),
            source,
        })?;

    decode(&content).map_err(|source| EntryError::Properties {
        name: name.to_string(),
        source,
    })
}

/// 将属性表中的每个键依次绑定
pub(crate) fn bind_map<T>(
    binder: &Binder<T>,
    target: &mut T,
    map: &PropertyMap,
    mode: BindMode,
) -> Vec<BindError> {
    map.iter()
        .flat_map(|(key, value)| binder.bind(target, value, key, mode))
        .collect()
}

/// 属性文件的标记节点内容：按键排序的 JSON 对象
pub(crate) fn marker_value(map: &PropertyMap) -> serde_json::Result<String> {
    serde_json::to_string(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::FieldBinding;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Default)]
    struct Pool {
        size: i32,
        name: String,
    }

    #[tokio::test]
    async fn test_read_and_bind_properties() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pool.properties"), "size=8\nname=main\n").unwrap();

        let map = read_properties(dir.path(), "pool.properties").await.unwrap();
        let binder = Binder::new()
            .field(FieldBinding::int32("size", "size", |p: &mut Pool, v| p.size = v))
            .field(FieldBinding::text("name", "name", |p: &mut Pool, v| p.name = v));

        let mut pool = Pool::default();
        assert!(bind_map(&binder, &mut pool, &map, BindMode::Initial).is_empty());
        assert_eq!(pool.size, 8);
        assert_eq!(pool.name, "main");
    }

    #[tokio::test]
    async fn test_non_properties_file_is_not_decoded() {
        let dir = TempDir::new().unwrap();
        let map = read_properties(dir.path(), "logo.png").await.unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let err = read_properties(dir.path(), "gone.properties").await.unwrap_err();
        assert!(matches!(err, EntryError::Io { name, .. } if name == "gone.properties"));
    }

    #[test]
    fn test_marker_value_is_sorted_json() {
        let mut map = PropertyMap::new();
        map.insert("b".into(), "2".into());
        map.insert("a".into(), "1".into());
        assert_eq!(marker_value(&map).unwrap(), r#"{"a":"1","b":"2"}"#);
    }
}
