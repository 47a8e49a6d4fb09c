//! 属性文件解析
//!
//! 将 `key=value` 行格式的属性文件解析为有序的键值表

use crate::error::PropertiesError;
use std::collections::BTreeMap;

/// 解析后的属性表，按键排序
pub type PropertyMap = BTreeMap<String, String>;

/// 解析属性文件内容
///
/// - 空行以及以 `#` / `!` 开头的行会被忽略
/// - 以第一个 `=` 或 `:` 分隔键与值，两侧空白会被去除
/// - 只有键没有分隔符时值为空字符串
/// - 行尾的 `\` 表示与下一行拼接
pub fn decode(content: &str) -> Result<PropertyMap, PropertiesError> {
    let mut map = PropertyMap::new();
    let mut pending = String::new();
    let mut start_line = 0;

    for (index, raw_line) in content.lines().enumerate() {
        let line = if pending.is_empty() {
            start_line = index + 1;
            let trimmed = raw_line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                continue;
            }
            trimmed
        } else {
            raw_line.trim_start()
        };

        if let Some(continued) = line.strip_suffix('\\') {
            pending.push_str(continued);
            continue;
        }

        pending.push_str(line);
        let (key, value) = split_pair(&pending);
        if key.is_empty() {
            return Err(PropertiesError::EmptyKey { line: start_line });
        }
        map.insert(key.to_string(), value.to_string());
        pending.clear();
    }

    if !pending.is_empty() {
        let (key, value) = split_pair(&pending);
        if key.is_empty() {
            return Err(PropertiesError::EmptyKey { line: start_line });
        }
        map.insert(key.to_string(), value.to_string());
    }

    Ok(map)
}

fn split_pair(line: &str) -> (&str, &str) {
    match line.find(['=', ':']) {
        Some(pos) => (line[..pos].trim(), line[pos + 1..].trim()),
        None => (line.trim(), ""),
    }
}
