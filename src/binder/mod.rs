//! 配置绑定模块
//!
//! 提供属性文件解析以及把配置值写入应用配置结构的类型化绑定

pub mod properties;
pub mod registry;

// 重新导出主要类型
pub use properties::{decode, PropertyMap};
pub use registry::{BindMode, Binder, Configurable, FieldBinding, FieldKind};
