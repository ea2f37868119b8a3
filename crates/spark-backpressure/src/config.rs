use core::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 默认每 8 条写入至少请求一次下游确认。
pub const DEFAULT_ACK_RATE: u32 = 8;

/// 流控阶段的构造期配置。
///
/// # 教案式说明
/// - **意图（Why）**：确认频率与低水位决定了“多久能得知写入落地”与“多早恢复读取”，
///   不同连接的吞吐特征差异很大，因此外部化为配置而不是常量。
/// - **契约（What）**：
///   - `ack_rate`：正整数，每 `ack_rate` 条写入至少请求一次下游确认；
///   - `low_watermark`：可选；读取被挂起时，若在途未确认写入数在某次完成后降到该值以下，立即恢复读取。
///     缺省时只依赖探测写在队列排空后恢复读取。
/// - **风险提示（Trade-offs）**：不配置低水位意味着每次背压至少多一个往返才恢复读取；
///   对延迟敏感的链路建议显式配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackpressureConfig {
    pub ack_rate: u32,
    pub low_watermark: Option<usize>,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            ack_rate: DEFAULT_ACK_RATE,
            low_watermark: None,
        }
    }
}

/// 完整配置文档中流控配置所在的表名。
pub const SECTION: &str = "backpressure";

impl BackpressureConfig {
    /// 构造并校验配置。
    pub fn new(ack_rate: u32, low_watermark: Option<usize>) -> Result<Self, ConfigError> {
        let config = Self {
            ack_rate,
            low_watermark,
        };
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文本装载配置。
    ///
    /// 文档含 `[backpressure]` 表时只解析该表，其余表留给宿主；否则把整个文档视为裸表。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut document: toml::Table = text.parse()?;
        let config = match document.remove(SECTION) {
            Some(section) => section.try_into::<Self>()?,
            None => toml::Value::Table(document).try_into::<Self>()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ack_rate_non_zero().map(|_| ())
    }

    pub(crate) fn ack_rate_non_zero(&self) -> Result<NonZeroU32, ConfigError> {
        NonZeroU32::new(self.ack_rate).ok_or(ConfigError::InvalidAckRate(self.ack_rate))
    }
}
