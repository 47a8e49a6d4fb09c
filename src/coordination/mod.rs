//! 协调服务模块
//!
//! 包含会话抽象、ZooKeeper 与内存实现、节点路径规则以及变更监听器

pub mod memory;
pub mod path;
pub mod session;
pub mod watcher;
pub mod zookeeper;

// 重新导出主要类型
pub use memory::MemoryCoordination;
pub use path::{Namespace, INSTANCE_PORT};
pub use session::{CoordinationClient, NodeEvent, NodeMode, SessionConnector, SessionState};
pub use watcher::{ArmedWatch, WatchEvent, Watcher, CONNECT_RETRIES};
pub use zookeeper::ZkConnector;
