//! 日志系统在全新进程中的初始化测试

use confsync::logging::{LogConfig, LoggingSystem};

#[test]
fn test_first_setup_in_fresh_process_succeeds() {
    let first = LoggingSystem::setup_logging(LogConfig::default());
    assert!(first.is_ok(), "首次初始化失败: {:?}", first.err());
    assert!(LoggingSystem::is_initialized());

    let second = LoggingSystem::setup_logging(LogConfig::default());
    assert!(second.is_ok(), "重复初始化失败: {:?}", second.err());

    tracing::info!("日志系统可用");
    log::info!("log 宏经桥接输出");
}
