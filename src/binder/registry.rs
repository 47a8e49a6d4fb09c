//! 配置字段绑定注册表
//!
//! 应用通过 [`Configurable`] 声明字段与配置键的对应关系，
//! [`Binder`] 在启动时一次性建立 键 → 类型化设置函数 的索引

use crate::error::{BindError, BindErrorKind};
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

/// 绑定模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// 启动时绑定：所有匹配字段都会被设置
    Initial,
    /// 实时更新：只设置标记为可重载的字段
    Auto,
}

/// 字段的语义类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    /// 无法从字符串转换的类型，保留声明的类型名
    Unsupported(&'static str),
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match *self {
            FieldKind::Text => "string",
            FieldKind::Int32 => "i32",
            FieldKind::Int64 => "i64",
            FieldKind::Float32 => "f32",
            FieldKind::Float64 => "f64",
            FieldKind::Bool => "bool",
            FieldKind::Unsupported(name) => name,
        }
    }
}

type Setter<T> = Arc<dyn Fn(&mut T, &str) -> Result<(), String> + Send + Sync>;

/// 单个字段的绑定声明
pub struct FieldBinding<T> {
    name: &'static str,
    key: String,
    kind: FieldKind,
    reloadable: bool,
    setter: Option<Setter<T>>,
}

impl<T> Clone for FieldBinding<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            key: self.key.clone(),
            kind: self.kind,
            reloadable: self.reloadable,
            setter: self.setter.clone(),
        }
    }
}

impl<T> fmt::Debug for FieldBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldBinding")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("reloadable", &self.reloadable)
            .finish()
    }
}

impl<T: 'static> FieldBinding<T> {
    fn parsed<V, F>(name: &'static str, key: impl Into<String>, kind: FieldKind, set: F) -> Self
    where
        V: FromStr + 'static,
        V::Err: Display,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        let setter: Setter<T> = Arc::new(move |target: &mut T, raw: &str| {
            let value = raw.parse::<V>().map_err(|e| e.to_string())?;
            set(target, value);
            Ok(())
        });

        Self {
            name,
            key: key.into(),
            kind,
            reloadable: false,
            setter: Some(setter),
        }
    }

    /// 文本字段，原样赋值
    pub fn text<F>(name: &'static str, key: impl Into<String>, set: F) -> Self
    where
        F: Fn(&mut T, String) + Send + Sync + 'static,
    {
        Self::parsed(name, key, FieldKind::Text, set)
    }

    pub fn int32<F>(name: &'static str, key: impl Into<String>, set: F) -> Self
    where
        F: Fn(&mut T, i32) + Send + Sync + 'static,
    {
        Self::parsed(name, key, FieldKind::Int32, set)
    }

    pub fn int64<F>(name: &'static str, key: impl Into<String>, set: F) -> Self
    where
        F: Fn(&mut T, i64) + Send + Sync + 'static,
    {
        Self::parsed(name, key, FieldKind::Int64, set)
    }

    pub fn float32<F>(name: &'static str, key: impl Into<String>, set: F) -> Self
    where
        F: Fn(&mut T, f32) + Send + Sync + 'static,
    {
        Self::parsed(name, key, FieldKind::Float32, set)
    }

    pub fn float64<F>(name: &'static str, key: impl Into<String>, set: F) -> Self
    where
        F: Fn(&mut T, f64) + Send + Sync + 'static,
    {
        Self::parsed(name, key, FieldKind::Float64, set)
    }

    /// 布尔字段，只接受 `true` / `false`
    pub fn boolean<F>(name: &'static str, key: impl Into<String>, set: F) -> Self
    where
        F: Fn(&mut T, bool) + Send + Sync + 'static,
    {
        Self::parsed(name, key, FieldKind::Bool, set)
    }

    /// 声明一个无法绑定的字段，绑定时会返回错误
    pub fn unsupported(name: &'static str, key: impl Into<String>, type_name: &'static str) -> Self {
        Self {
            name,
            key: key.into(),
            kind: FieldKind::Unsupported(type_name),
            reloadable: false,
            setter: None,
        }
    }

    /// 标记为可在实时同步中更新
    pub fn reloadable(mut self) -> Self {
        self.reloadable = true;
        self
    }
}

impl<T> FieldBinding<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_reloadable(&self) -> bool {
        self.reloadable
    }

    fn unsupported_error(&self) -> Option<BindError> {
        match self.kind {
            FieldKind::Unsupported(type_name) => Some(BindError {
                field: self.name,
                key: self.key.clone(),
                kind: BindErrorKind::UnsupportedType(type_name),
            }),
            _ => None,
        }
    }

    fn apply(&self, target: &mut T, raw: &str) -> Result<(), BindError> {
        let Some(setter) = &self.setter else {
            return Err(self
                .unsupported_error()
                .unwrap_or_else(|| BindError {
                    field: self.name,
                    key: self.key.clone(),
                    kind: BindErrorKind::UnsupportedType(self.kind.type_name()),
                }));
        };

        setter(target, raw).map_err(|reason| BindError {
            field: self.name,
            key: self.key.clone(),
            kind: BindErrorKind::Parse {
                value: raw.to_string(),
                type_name: self.kind.type_name(),
                reason,
            },
        })
    }
}

/// 应用配置结构的字段声明契约
pub trait Configurable: Clone + Send + Sync + 'static {
    /// 声明全部可绑定字段
    fn bindings() -> Vec<FieldBinding<Self>>;
}

/// 键到字段绑定的索引
pub struct Binder<T> {
    fields: HashMap<String, Vec<FieldBinding<T>>>,
}

impl<T> fmt::Debug for Binder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binder").field("fields", &self.fields).finish()
    }
}

impl<T> Default for Binder<T> {
    fn default() -> Self {
        Self {
            fields: HashMap::new(),
        }
    }
}

impl<T: Configurable> Binder<T> {
    /// 按应用声明的字段建立索引
    pub fn for_config() -> Self {
        Self::from_bindings(T::bindings())
    }
}

impl<T> Binder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bindings(bindings: impl IntoIterator<Item = FieldBinding<T>>) -> Self {
        bindings.into_iter().fold(Self::new(), Self::field)
    }

    /// 注册一个字段
    pub fn field(mut self, binding: FieldBinding<T>) -> Self {
        self.fields
            .entry(binding.key.clone())
            .or_default()
            .push(binding);
        self
    }

    /// 注册时即可发现的不支持类型字段
    pub fn unsupported_fields(&self) -> Vec<BindError> {
        let mut errors: Vec<BindError> = self
            .fields
            .values()
            .flatten()
            .filter_map(FieldBinding::unsupported_error)
            .collect();
        errors.sort_by(|a, b| a.key.cmp(&b.key).then(a.field.cmp(&b.field)));
        errors
    }

    /// 是否有字段声明了该键
    pub fn has_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// 将原始字符串绑定到所有声明了 `key` 的字段
    ///
    /// # 参数
    /// * `target` - 被修改的配置结构
    /// * `raw` - 原始值
    /// * `key` - 配置键
    /// * `mode` - 绑定模式，`Auto` 只更新可重载字段
    ///
    /// # 返回
    /// * `Vec<BindError>` - 每个失败字段一条错误，成功的字段照常生效
    pub fn bind(&self, target: &mut T, raw: &str, key: &str, mode: BindMode) -> Vec<BindError> {
        let Some(bindings) = self.fields.get(key) else {
            return Vec::new();
        };

        bindings
            .iter()
            .filter(|binding| mode == BindMode::Initial || binding.reloadable)
            .filter_map(|binding| binding.apply(target, raw).err())
            .collect()
    }
}
