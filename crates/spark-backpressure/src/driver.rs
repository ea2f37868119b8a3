//! Tokio 上的单任务驱动器。
//!
//! # 教案式概览
//! - **意图（Why）**：序号运算假设单一写者。宿主若并行处理 I/O，必须把同一连接的全部命令与事件
//!   汇入一条有序队列后再交给阶段；本模块把这一约束落成“一连接一任务”的最小实现。
//! - **结构（How）**：
//!   - 输入走一条有界 `mpsc` 通道，命令与事件共用，天然保持到达顺序；
//!   - 输出走两条无界通道：阶段回调是同步且不可失败的，不能在输出侧等待；
//!   - 任务在全部 [`StageHandle`] 被释放后正常结束，遇到致命错误时记录日志并带错误结束。
//! - **风险提示（Trade-offs）**：输出通道无界，宿主若长期不消费 `downstream`/`upstream`，
//!   内存会随之增长；阶段本身的背压只作用于读取方向。

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, trace};

use crate::{
    config::BackpressureConfig,
    context::StageContext,
    error::{ConfigError, DriverClosed, FlowControlError},
    message::{Command, Event},
    stage::BackpressureStage,
};

const TARGET: &str = "spark.backpressure.driver";

/// 默认输入队列容量。
pub const DEFAULT_INPUT_CAPACITY: usize = 1024;

/// 汇入驱动任务的单条输入。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Event(Event),
}

/// 向驱动任务投递命令与事件的句柄，可克隆。
#[derive(Clone, Debug)]
pub struct StageHandle {
    inputs: mpsc::Sender<Input>,
}

impl StageHandle {
    /// 投递一条来自应用的命令。
    pub async fn command(&self, command: Command) -> Result<(), DriverClosed> {
        self.send(Input::Command(command)).await
    }

    /// 投递一条来自传输层的事件。
    pub async fn event(&self, event: Event) -> Result<(), DriverClosed> {
        self.send(Input::Event(event)).await
    }

    pub async fn send(&self, input: Input) -> Result<(), DriverClosed> {
        self.inputs.send(input).await.map_err(|_| DriverClosed)
    }

    /// 驱动任务是否已经结束。
    pub fn is_closed(&self) -> bool {
        self.inputs.is_closed()
    }
}

/// 驱动任务的两路输出。
#[derive(Debug)]
pub struct DriverOutputs {
    /// 发往传输层的命令。
    pub downstream: mpsc::UnboundedReceiver<Command>,
    /// 发往应用的事件。
    pub upstream: mpsc::UnboundedReceiver<Event>,
}

/// 已启动的驱动任务。
#[derive(Debug)]
pub struct StageDriver {
    pub handle: StageHandle,
    pub outputs: DriverOutputs,
    pub task: JoinHandle<Result<(), FlowControlError>>,
}

impl StageDriver {
    /// 以默认输入容量启动驱动任务。必须在 Tokio 运行时内调用。
    pub fn spawn(config: &BackpressureConfig) -> Result<Self, ConfigError> {
        Self::spawn_with_capacity(config, DEFAULT_INPUT_CAPACITY)
    }

    pub fn spawn_with_capacity(
        config: &BackpressureConfig,
        capacity: usize,
    ) -> Result<Self, ConfigError> {
        let stage = BackpressureStage::new(config)?;
        let (input_tx, input_rx) = mpsc::channel(capacity.max(1));
        let (downstream_tx, downstream_rx) = mpsc::unbounded_channel();
        let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();
        let ctx = ChannelContext {
            downstream: downstream_tx,
            upstream: upstream_tx,
        };
        let task = tokio::spawn(run(stage, input_rx, ctx));
        Ok(Self {
            handle: StageHandle { inputs: input_tx },
            outputs: DriverOutputs {
                downstream: downstream_rx,
                upstream: upstream_rx,
            },
            task,
        })
    }
}

struct ChannelContext {
    downstream: mpsc::UnboundedSender<Command>,
    upstream: mpsc::UnboundedSender<Event>,
}

impl StageContext for ChannelContext {
    fn send_downstream(&mut self, command: Command) {
        if self.downstream.send(command).is_err() {
            trace!(target: TARGET, "downstream receiver dropped, command discarded");
        }
    }

    fn emit_upstream(&mut self, event: Event) {
        if self.upstream.send(event).is_err() {
            trace!(target: TARGET, "upstream receiver dropped, event discarded");
        }
    }
}

async fn run(
    mut stage: BackpressureStage,
    mut inputs: mpsc::Receiver<Input>,
    mut ctx: ChannelContext,
) -> Result<(), FlowControlError> {
    while let Some(input) = inputs.recv().await {
        let outcome = match input {
            Input::Command(command) => stage.on_command(&mut ctx, command),
            Input::Event(event) => stage.on_event(&mut ctx, event),
        };
        if let Err(err) = outcome {
            error!(
                target: TARGET,
                code = err.code(),
                error = %err,
                "driver stopping on fatal error"
            );
            return Err(err);
        }
    }
    debug!(
        target: TARGET,
        buffered = stage.buffered(),
        phase = ?stage.phase(),
        "all stage handles dropped, driver exiting"
    );
    Ok(())
}
