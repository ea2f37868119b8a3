//! 背压状态机：在“直通”与“缓冲”两态之间切换的流控阶段。
//!
//! # 教案式概览
//! - **意图（Why）**：传输层的发送缓冲有限且容量未知，唯一可靠的信号是“某条写入被拒绝”。
//!   阶段据此挂起入站读取（出站工作的来源），待传输层排空后重放被拒绝及期间缓存的写入，
//!   再经由正常路径恢复读取，全程不丢写、不重写，也不破坏应用自身的确认契约。
//! - **结构（How）**：
//!   - [`StageState`] 为显式的标签变体，命令处理与事件处理两半随变体一起整体替换，绝不单独切换；
//!   - 每次回调先把当前状态取出，计算出下一个状态后再整体写回；计算途中返回致命错误时，
//!     阶段停留在 `Poisoned`，后续输入一律拒绝；
//!   - 写队列只归当前状态所有：进入缓冲态时整体交接，恢复直通时被消费并在新纪元中重放。
//! - **契约（What）**：单线程、逐条处理，任何回调都不会阻塞；挂起/恢复读取只是发往传输层的信号。

use core::{mem, num::NonZeroU32};

use tracing::{debug, error, trace};

use crate::{
    config::BackpressureConfig,
    context::StageContext,
    error::{ConfigError, FlowControlError},
    message::{AckMarker, Command, Event, Write},
    queue::{SequencedWriteQueue, UpstreamAck},
};

const TARGET: &str = "spark.backpressure";

/// 阶段当前所处的阶段名，用于观测与断言。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Flowing,
    Buffering,
    Poisoned,
}

/// 直通态：写入立即带标记转发。
#[derive(Debug)]
pub struct Flowing {
    queue: SequencedWriteQueue,
    read_suspended: bool,
}

/// 缓冲态：写入只追加不转发，读取恒为挂起。
#[derive(Debug)]
pub struct Buffering {
    queue: SequencedWriteQueue,
}

/// 阶段状态的标签变体。
#[derive(Debug)]
pub enum StageState {
    Flowing(Flowing),
    Buffering(Buffering),
    Poisoned,
}

#[derive(Clone, Copy, Debug)]
struct Settings {
    ack_rate: NonZeroU32,
    low_watermark: Option<usize>,
}

/// 读写背压流控阶段。
///
/// # 教案式说明
/// - **意图（Why）**：把“写被拒 → 挂起读取 → 等待传输层排空 → 重放 → 恢复读取”的完整闭环
///   收敛到一个可独立测试的同步状态机中，宿主只需负责按序投递命令与事件。
/// - **逻辑（How）**：
///   1. 初始为直通态，读取未挂起，序号从 0 开始；
///   2. 直通态收到写失败：确认失败写入之前的全部条目，交接队列进入缓冲态；
///      进入时若读取未挂起则先挂起，随后无条件请求 `ResumeWriting`；
///   3. 缓冲态收到 `WritingResumed`：以旧队首序号开启新纪元，读取视为挂起，
///      按原顺序重放全部缓存写入，最后追加一条零负载探测写；
///   4. 直通态下，完成事件使在途数低于低水位，或探测写完成时，恢复读取。
/// - **契约（What）**：
///   - `on_command`/`on_event` 每次只处理一条输入并同步完成全部转发；
///   - 返回 `Err` 意味着传输层违背了单调送达契约，宿主应关闭连接。
/// - **风险提示（Trade-offs）**：恢复直通时读取一律视为挂起，必须经由正常路径重新赢得恢复；
///   这简化了跨纪元的账目，代价是没有低水位时多一个往返。
#[derive(Debug)]
pub struct BackpressureStage {
    settings: Settings,
    state: StageState,
}

impl BackpressureStage {
    /// 以给定配置构造阶段，初始为直通态。
    pub fn new(config: &BackpressureConfig) -> Result<Self, ConfigError> {
        let settings = Settings {
            ack_rate: config.ack_rate_non_zero()?,
            low_watermark: config.low_watermark,
        };
        Ok(Self {
            settings,
            state: StageState::Flowing(Flowing::fresh(0, settings.ack_rate, false)),
        })
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            StageState::Flowing(_) => Phase::Flowing,
            StageState::Buffering(_) => Phase::Buffering,
            StageState::Poisoned => Phase::Poisoned,
        }
    }

    pub fn state(&self) -> &StageState {
        &self.state
    }

    /// 入站读取当前是否被挂起。
    pub fn is_read_suspended(&self) -> bool {
        match &self.state {
            StageState::Flowing(flowing) => flowing.read_suspended,
            StageState::Buffering(_) => true,
            StageState::Poisoned => false,
        }
    }

    /// 尚未得到传输层结论（或等待重放）的写入数。
    pub fn buffered(&self) -> usize {
        self.queue().map_or(0, SequencedWriteQueue::len)
    }

    /// 当前队列的队首序号。
    pub fn head_sequence(&self) -> Option<u64> {
        self.queue().map(SequencedWriteQueue::head_sequence)
    }

    fn queue(&self) -> Option<&SequencedWriteQueue> {
        match &self.state {
            StageState::Flowing(flowing) => Some(&flowing.queue),
            StageState::Buffering(buffering) => Some(&buffering.queue),
            StageState::Poisoned => None,
        }
    }

    /// 处理一条来自上游的命令。
    pub fn on_command(
        &mut self,
        ctx: &mut dyn StageContext,
        command: Command,
    ) -> Result<(), FlowControlError> {
        trace!(
            target: TARGET,
            command = command.kind(),
            phase = ?self.phase(),
            "command received"
        );
        match &mut self.state {
            StageState::Flowing(flowing) => {
                flowing.on_command(ctx, command);
                Ok(())
            }
            StageState::Buffering(buffering) => {
                buffering.on_command(ctx, command);
                Ok(())
            }
            StageState::Poisoned => Err(FlowControlError::Poisoned),
        }
    }

    /// 处理一条来自下游的事件。
    pub fn on_event(
        &mut self,
        ctx: &mut dyn StageContext,
        event: Event,
    ) -> Result<(), FlowControlError> {
        trace!(
            target: TARGET,
            event = event.kind(),
            phase = ?self.phase(),
            "event received"
        );
        let next = match mem::replace(&mut self.state, StageState::Poisoned) {
            StageState::Flowing(flowing) => flowing.on_event(self.settings, ctx, event),
            StageState::Buffering(buffering) => buffering.on_event(self.settings, ctx, event),
            StageState::Poisoned => return Err(FlowControlError::Poisoned),
        };
        match next {
            Ok(state) => {
                self.state = state;
                Ok(())
            }
            Err(err) => {
                error!(
                    target: TARGET,
                    code = err.code(),
                    error = %err,
                    "backpressure stage poisoned"
                );
                Err(err)
            }
        }
    }
}

impl Flowing {
    fn fresh(head: u64, ack_rate: NonZeroU32, read_suspended: bool) -> Self {
        Self {
            queue: SequencedWriteQueue::starting_at(head, ack_rate),
            read_suspended,
        }
    }

    pub fn queue(&self) -> &SequencedWriteQueue {
        &self.queue
    }

    pub fn is_read_suspended(&self) -> bool {
        self.read_suspended
    }

    fn on_command(&mut self, ctx: &mut dyn StageContext, command: Command) {
        match command {
            Command::Write(write) => self.send(ctx, write),
            other => ctx.send_downstream(other),
        }
    }

    fn send(&mut self, ctx: &mut dyn StageContext, write: Write) {
        let tagged = self.queue.enqueue(write);
        ctx.send_downstream(Command::Write(tagged));
    }

    fn on_event(
        mut self,
        settings: Settings,
        ctx: &mut dyn StageContext,
        event: Event,
    ) -> Result<StageState, FlowControlError> {
        match event {
            Event::Acked(AckMarker::Ack(Some(sequence))) => {
                let signal = self.queue.dequeue(sequence)?;
                deliver(ctx, signal);
                if self.read_suspended
                    && settings
                        .low_watermark
                        .is_some_and(|watermark| self.queue.len() < watermark)
                {
                    debug!(
                        target: TARGET,
                        buffered = self.queue.len(),
                        low_watermark = ?settings.low_watermark,
                        "in-flight writes below low watermark, resuming reads"
                    );
                    self.resume_reading(ctx);
                }
            }
            Event::Acked(AckMarker::Probe) => {
                if self.read_suspended {
                    debug!(
                        target: TARGET,
                        buffered = self.queue.len(),
                        "probe acknowledged, resuming reads"
                    );
                    self.resume_reading(ctx);
                }
            }
            Event::CommandFailed(Command::Write(failed)) => match failed.ack {
                AckMarker::Ack(Some(sequence)) | AckMarker::NoAck(Some(sequence)) => {
                    let signal = self.queue.dequeue_before(sequence)?;
                    deliver(ctx, signal);
                    debug!(
                        target: TARGET,
                        sequence,
                        head = self.queue.head_sequence(),
                        buffered = self.queue.len(),
                        read_suspended = self.read_suspended,
                        "write rejected by transport, buffering"
                    );
                    return Ok(Buffering::enter(ctx, self.queue, self.read_suspended));
                }
                AckMarker::Probe => {
                    // 探测写排在所有在途写入之后，它被拒绝说明前面的写入均已被接收。
                    let signal = self.queue.dequeue_all()?;
                    deliver(ctx, signal);
                    debug!(
                        target: TARGET,
                        head = self.queue.head_sequence(),
                        "probe rejected by transport, buffering"
                    );
                    return Ok(Buffering::enter(ctx, self.queue, self.read_suspended));
                }
                ack => ctx.emit_upstream(Event::CommandFailed(Command::Write(Write {
                    payload: failed.payload,
                    ack,
                }))),
            },
            other => ctx.emit_upstream(other),
        }
        Ok(StageState::Flowing(self))
    }

    fn resume_reading(&mut self, ctx: &mut dyn StageContext) {
        ctx.send_downstream(Command::ResumeReading);
        self.read_suspended = false;
    }
}

impl Buffering {
    fn enter(
        ctx: &mut dyn StageContext,
        queue: SequencedWriteQueue,
        read_suspended: bool,
    ) -> StageState {
        if !read_suspended {
            ctx.send_downstream(Command::SuspendReading);
        }
        // 排在传输层仍会丢弃的写入之后，到达时积压自然已清空。
        ctx.send_downstream(Command::ResumeWriting);
        StageState::Buffering(Self { queue })
    }

    pub fn queue(&self) -> &SequencedWriteQueue {
        &self.queue
    }

    fn on_command(&mut self, ctx: &mut dyn StageContext, command: Command) {
        match command {
            Command::Write(write) => self.queue.hold(write),
            other => ctx.send_downstream(other),
        }
    }

    /// 缓冲态只认写失败、恢复写与探测确认。
    ///
    /// 队列里混有从未发出的缓存写入，完成事件无法与之区分，因此不作用于队列，原样上送。
    fn on_event(
        self,
        settings: Settings,
        ctx: &mut dyn StageContext,
        event: Event,
    ) -> Result<StageState, FlowControlError> {
        match event {
            Event::CommandFailed(Command::Write(failed)) => {
                trace!(
                    target: TARGET,
                    sequence = ?failed.ack.sequence(),
                    "rejection absorbed while buffering"
                );
            }
            Event::WritingResumed => return Ok(self.resume(settings, ctx)),
            Event::Acked(AckMarker::Probe) => {
                trace!(
                    target: TARGET,
                    "stale probe acknowledgment absorbed while buffering"
                );
            }
            other => ctx.emit_upstream(other),
        }
        Ok(StageState::Buffering(self))
    }

    fn resume(self, settings: Settings, ctx: &mut dyn StageContext) -> StageState {
        let head = self.queue.head_sequence();
        let replayed = self.queue.len();
        let mut flowing = Flowing::fresh(head, settings.ack_rate, true);
        for pending in self.queue.into_pending() {
            flowing.send(ctx, pending.into_replay());
        }
        ctx.send_downstream(Command::Write(Write::probe()));
        debug!(
            target: TARGET,
            head,
            replayed,
            "writing resumed, replayed buffered writes"
        );
        StageState::Flowing(flowing)
    }
}

fn deliver(ctx: &mut dyn StageContext, signal: Option<UpstreamAck>) {
    if let Some(ack) = signal {
        ctx.emit_upstream(ack.into_event());
    }
}
