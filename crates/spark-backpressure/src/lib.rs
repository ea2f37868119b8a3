#![deny(unsafe_code)]
#![doc = r#"
# spark-backpressure

## 设计动机（Why）
- **定位**：位于应用写入与流式传输（如 TCP 连接）之间的流控阶段。传输层的发送完成异步到达，
  发送缓冲有限且容量事先未知；阶段在某次写入被拒绝时挂起入站读取（出站工作的来源），
  待传输层排空后恢复读写，既不丢失也不重复任何已缓存写入。
- **架构角色**：宿主 Pipeline 只需提供“向下游发命令、向上游发事件”两项能力以及单调的投递顺序，
  见 [`StageContext`]；连接建立、编解码与拥塞控制均不在本 crate 范围内。

## 核心契约（What）
- [`SequencedWriteQueue`]：按严格递增序号保存在途写入，按 `ack_rate` 周期性请求下游确认，
  并以序号关联异步到达的完成与失败；
- [`BackpressureStage`]：`Flowing`/`Buffering` 两态状态机，决定写入直通还是缓存，
  驱动读取的挂起与恢复；
- 传输层违背单调送达时返回 [`FlowControlError`]，阶段随即中毒，宿主应关闭连接。

## 实现策略（How）
- 状态为显式标签变体，迁移时整体替换；进入缓冲态时交接队列，恢复直通时以旧队首序号开启新纪元并重放；
- 恢复后追加一条零负载探测写，保证未配置低水位时读取也能恢复；
- 可选的 [`driver`] 模块（`runtime-tokio` 特性）把阶段托管在单个 Tokio 任务中。

## 风险与考量（Trade-offs）
- 不实现拥塞控制或重传计时器；只适合“生产者写、消费者读”形态的流量；
- 未配置低水位时，每次背压都要多等一个探测写往返才恢复读取。
"#]

extern crate alloc;

pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod queue;
pub mod stage;

#[cfg(feature = "runtime-tokio")]
pub mod driver;
#[cfg(feature = "std")]
pub mod telemetry;

pub use config::BackpressureConfig;
pub use context::{Output, RecordingContext, StageContext};
pub use error::{ConfigError, FlowControlError};
pub use message::{AckMarker, Command, Event, Write};
pub use queue::{PendingWrite, SequencedWriteQueue, UpstreamAck};
pub use stage::{BackpressureStage, Phase, StageState};

#[cfg(feature = "runtime-tokio")]
pub use driver::{DriverOutputs, Input, StageDriver, StageHandle};
