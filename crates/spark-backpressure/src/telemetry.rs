use tracing_subscriber::EnvFilter;

use crate::error::TelemetryError;

/// 未设置 `RUST_LOG` 时使用的过滤指令。
pub const DEFAULT_DIRECTIVE: &str = "spark.backpressure=info";

/// 安装进程级 `tracing` Subscriber（`fmt` + `EnvFilter`）。
///
/// # 教案式说明
/// - **意图（Why）**：流控阶段只通过 `tracing` 宏打点，是否输出、输出到哪里由宿主决定；
///   独立运行或调试时调用本函数即可获得可读日志。
/// - **契约（What）**：优先读取 `RUST_LOG`，否则使用 [`DEFAULT_DIRECTIVE`]；
///   进程内已有全局 Subscriber 时返回 [`TelemetryError::SubscriberAlreadySet`]，不会 panic。
pub fn install_subscriber() -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| TelemetryError::SubscriberAlreadySet(err.to_string()))
}
