//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 票据协议对外只通过 [`Outcome`](crate::Outcome) 表达操作失败；本模块中的错误类型只覆盖两类场景：
//!   1. 调用方误用 API（重复完成、未绑定链路、未知方法），在触发调用处直接返回；
//!   2. 协作者边界上的失败（链路拒收、服务端找不到方法、畸形票据），由状态机折叠成终态。
//! - 客户代码自身的错误统一以 [`BoxError`] 承载，在派发边界被转换为
//!   `SERVICER_FAILURE` / `SERVICED_FAILURE`。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，满足 `Send + Sync + 'static`，可安全跨线程传播；
//! - 错误消息保持英文、携带操作 ID 或方法名等排障上下文。

use std::borrow::Cow;

use thiserror::Error;

use crate::{outcome::Outcome, ticket::OperationId};

/// 客户代码（Servicer、Consumer、Ingestor）返回的通用错误。
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 票据协议 API 的调用错误。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“应用程序缺陷”与“传输/对端故障”：前者在调用点以 `Err` 返回，后者只会体现为终态；
/// - **契约 (What)**：每个变体都携带可读上下文，`From<ConfigError>` 让配置加载可直接 `?` 传播；
/// - **风险 (Trade-offs)**：`CompletionAlreadyEmitted` 属于程序缺陷，调用方不应重试。
#[derive(Debug, Error)]
pub enum TicketError {
    /// Front 配置了方法表，但调用的方法名不在其中。
    #[error("method `{name}` is not registered on this front")]
    NoSuchMethod { name: String },

    /// 同一操作第二次宣告完成，或在完成后继续发送负载。
    #[error("operation `{operation_id}` already emitted its completion")]
    CompletionAlreadyEmitted { operation_id: OperationId },

    /// Front 尚未通过 `join_rear_link` 绑定对端。
    #[error("end is not joined to a link")]
    NotLinked,

    /// 配置加载或校验失败。
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// 畸形票据：种类与字段存在性不一致，或序号违反保留规则。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("malformed ticket #{sequence_number} for operation `{operation_id}`: {reason}")]
pub struct MalformedTicketError {
    operation_id: OperationId,
    sequence_number: u64,
    reason: &'static str,
}

impl MalformedTicketError {
    pub fn new(operation_id: OperationId, sequence_number: u64, reason: &'static str) -> Self {
        Self {
            operation_id,
            sequence_number,
            reason,
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

/// 链路层拒绝或无法投递票据。
///
/// 发送路径上的任何 `LinkError` 都会让本地操作以 `TRANSMISSION_FAILURE` 立即终止，不做重试。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    /// 对端已经释放或链路已关闭。
    #[error("link is closed")]
    Closed,
    /// 链路拒收票据（例如缓冲区已满、编码失败）。
    #[error("link rejected ticket: {0}")]
    Rejected(Cow<'static, str>),
}

/// `Servicer::service` 的失败类型。
#[derive(Debug, Error)]
pub enum ServiceError {
    /// 服务端不认识该方法名，Front 将观测到 `RECEPTION_FAILURE`。
    #[error("no such method `{0}`")]
    NoSuchMethod(String),
    /// 业务代码启动失败，Front 将观测到 `SERVICER_FAILURE`。
    #[error("servicer failed: {0}")]
    Failure(#[source] BoxError),
}

impl ServiceError {
    /// 该失败对应的终态。
    pub fn outcome(&self) -> Outcome {
        match self {
            ServiceError::NoSuchMethod(_) => Outcome::ReceptionFailure,
            ServiceError::Failure(_) => Outcome::ServicerFailure,
        }
    }
}

/// 配置加载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(Cow<'static, str>),
}

/// 调用便捷封装（[`crate::calls`]）的失败类型：终态 1:1 翻译为错误。
#[derive(Debug, Error)]
pub enum CallError {
    /// 操作以非 `COMPLETED` 终态结束。
    #[error("operation terminated with outcome `{0}`")]
    Aborted(Outcome),
    /// 操作自然完成，但没有收到一元响应。
    #[error("operation completed without a response payload")]
    MissingResponse,
    /// 发起操作时的 API 错误。
    #[error(transparent)]
    Ticket(#[from] TicketError),
}

impl CallError {
    /// 若错误源自终态，返回该终态。
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            CallError::Aborted(outcome) => Some(*outcome),
            _ => None,
        }
    }
}
