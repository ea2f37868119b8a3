//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义流控阶段对外暴露的错误语义，区分“可在本地恢复的传输拒绝”与“必须立即终止的契约违背”；
//! - 与 `spark-transport-tcp` 的做法一致，为每类错误提供稳定错误码，便于告警聚合。
//!
//! ## 设计要求（What）
//! - 传输拒绝（写入失败）与冗余拒绝**不是**错误，它们由状态机就地吸收，不会出现在这里；
//! - 完成事件乱序属于致命错误：账目可能已损坏，阶段随即进入中毒状态；
//! - 配置错误在构造阶段暴露，不会延迟到运行期。

use thiserror::Error;

/// 完成事件乱序的稳定错误码。
pub const OUT_OF_ORDER_CODE: &str = "spark.backpressure.out_of_order_completion";
/// 阶段已中毒的稳定错误码。
pub const POISONED_CODE: &str = "spark.backpressure.poisoned";
/// 确认频率非法的稳定错误码。
pub const INVALID_ACK_RATE_CODE: &str = "spark.backpressure.config.invalid_ack_rate";
/// 配置解析失败的稳定错误码。
pub const CONFIG_PARSE_CODE: &str = "spark.backpressure.config.parse_failed";

/// 流控阶段的运行期错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：传输层承诺完成事件按写入顺序单调送达；一旦违背，序号账目不可再信任，
///   继续运行可能重复确认或丢失写入，因此选择快速失败。
/// - **契约 (What)**：
///   - `OutOfOrderCompletion`：`sequence` 为事件携带的序号，`head` 为队列当前的队首序号；
///   - `Poisoned`：此前已返回过致命错误，阶段拒绝继续处理任何输入；
///   - 所有变体均可安全跨线程传播。
/// - **风险 (Trade-offs)**：宿主收到错误后应关闭连接；阶段不会尝试自愈。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum FlowControlError {
    #[error(
        "completion for sequence {sequence} arrived out of order (queue head is {head})"
    )]
    OutOfOrderCompletion { head: u64, sequence: u64 },

    #[error("backpressure stage is poisoned by an earlier fatal error")]
    Poisoned,
}

impl FlowControlError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            FlowControlError::OutOfOrderCompletion { .. } => OUT_OF_ORDER_CODE,
            FlowControlError::Poisoned => POISONED_CODE,
        }
    }
}

/// 配置装载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `ack_rate` 必须为正整数。
    #[error("ack_rate must be a positive integer, got {0}")]
    InvalidAckRate(u32),

    /// TOML 文本无法解析为流控配置。
    #[error("failed to parse backpressure configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::InvalidAckRate(_) => INVALID_ACK_RATE_CODE,
            ConfigError::Parse(_) => CONFIG_PARSE_CODE,
        }
    }
}

/// 驱动任务已结束，无法再投递输入。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("backpressure driver task has terminated")]
pub struct DriverClosed;

/// 安装 tracing Subscriber 失败。
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// 进程内已经存在全局 Subscriber。
    #[error("global tracing subscriber already installed: {0}")]
    SubscriberAlreadySet(String),
}
