//! 可观测性：tracing 日志初始化
//!
//! 日志一律写 stderr；stdout 在 serve 模式下承载 NDJSON 线协议。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认过滤级别，可被 RUST_LOG 覆盖
pub const DEFAULT_FILTER: &str = "info";

pub fn init() {
    init_with(DEFAULT_FILTER);
}

/// 以给定的默认级别初始化；重复初始化时忽略
pub fn init_with(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
