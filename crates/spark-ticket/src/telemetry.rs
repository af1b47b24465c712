//! # telemetry：日志订阅器安装
//!
//! ## 意图（Why）
//! - 状态机内部只通过 `tracing` 宏输出结构化事件（`operation_id`、`outcome`、`sequence_number` 等字段），
//!   宿主可以接入任意 Subscriber；
//! - 对没有自带 Subscriber 的宿主（示例程序、集成测试），提供一次性安装 `fmt + EnvFilter` 的入口。
//!
//! ## 契约（What）
//! - 过滤指令优先取调用参数，其次取 `RUST_LOG`，最后回退到 `info`；
//! - 本模块已安装过时再次调用直接返回 `Ok(())`；外部已设置全局 Subscriber 时返回错误。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, filter::ParseError};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装过程中的失败。
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// 外部提前设置了全局 Subscriber。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    /// 过滤指令无法解析。
    #[error("invalid filter directives: {0}")]
    InvalidDirectives(#[from] ParseError),
    /// 设置全局 Subscriber 的底层失败。
    #[error("failed to set global subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装 `fmt` 格式化输出与 `EnvFilter` 过滤。
///
/// # 教案式说明
/// - **意图 (Why)**：让测试与示例“一行开启日志”；
/// - **逻辑 (How)**：
///   1. 已由本模块安装则直接返回；
///   2. 检查是否已有外部 Subscriber；
///   3. 解析过滤指令并设置全局默认 Subscriber；
/// - **契约 (What)**：`directives` 语法与 `RUST_LOG` 相同，例如 `"spark_ticket=debug"`。
pub fn install(directives: Option<&str>) -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }

    let filter = build_env_filter(directives)?;
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = INSTALLED.set(());
    Ok(())
}

fn build_env_filter(directives: Option<&str>) -> Result<EnvFilter, ParseError> {
    match directives {
        Some(directives) => EnvFilter::try_new(directives),
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}
