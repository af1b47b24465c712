#![deny(unsafe_code)]

//! # spark-ticket
//!
//! ## 定位与职责（Why）
//! - 以“票据”驱动单个 RPC 操作的完整生命周期：发起、双向零到多次数据交换、完成/取消/过期；
//! - Front（客户端）与 Back（服务端）各自运行镜像状态机，通过有序票据流对齐终态，并以额度（allowance）
//!   实现双向背压；
//! - 传输层、负载编解码与线程池实现均不在本 crate 之内，仅以 [`RearLink`]/[`ForeLink`] 与 [`WorkPool`]
//!   接口消费。
//!
//! ## 架构嵌入（Where）
//! - `outcome` / `ticket`：纯数据模型与字段一致性校验；
//! - `context` / `customer`：客户代码可见的操作视图与三个回调接口；
//! - `operation`：单操作状态机（私有），对外只暴露 [`Operator`] 与 [`OperationHandle`]；
//! - `ends` / `link`：两端的操作表、票据路由与进程内直连；
//! - `methods` / `calls` / `stream`：按方法基数组织的服务端与客户端便捷层；
//! - `config` / `telemetry` / `runtime`：配置、日志订阅器与工作池等环境能力。
//!
//! ## 行为契约（What）
//! - 每个操作恰好获得一个 [`Outcome`]，先到的终止原因胜出；
//! - 状态机从不在持有内部锁时调用客户代码或链路；
//! - 操作在终态已定且收发两侧都空闲后才从所属端的表中移除，并计入 `operation_stats()`。

/// 调用便捷封装。
pub mod calls;
pub mod config;
pub mod context;
pub mod customer;
/// Front 与 Back 两端。
pub mod ends;
/// 错误类型集中声明处。
///
/// - **意图说明 (Why)**：区分调用方误用（直接返回）与协议失败（折叠为终态）；
/// - **契约定位 (What)**：全部使用 `thiserror::Error` 派生，满足 `Send + Sync + 'static`。
pub mod error;
pub mod link;
pub mod methods;
mod operation;
pub mod outcome;
pub mod runtime;
pub mod stream;
pub mod telemetry;
/// 测试桩命名空间，供本 crate 与下游集成测试复用。
pub mod test_stubs;
pub mod ticket;

pub use crate::{
    config::EndConfig,
    context::{OperationContext, TerminationCallback},
    customer::{Consumer, Ingestor, Servicer, Subscription},
    ends::{Back, Front, OperationStats, WeakBack, WeakFront},
    error::{
        BoxError, CallError, ConfigError, LinkError, MalformedTicketError, ServiceError,
        TicketError,
    },
    link::{ForeLink, RearLink, connect},
    methods::{MethodImplementation, MethodServicer, PayloadIter},
    operation::{OperationHandle, Operator},
    outcome::Outcome,
    runtime::{Task, TimerHandle, TokioWorkPool, WorkPool},
    stream::{ChannelConsumer, StreamItem},
    ticket::{
        BackToFrontKind, BackToFrontTicket, FrontToBackKind, FrontToBackTicket, OperationId,
        Payload, SubscriptionKind,
    },
};
