//! 流控阶段收发的命令与事件词汇表。
//!
//! # 教案式概览
//! - **方向约定**：[`Command`] 自上游（应用）流向下游（传输层），[`Event`] 自下游流向上游；
//! - **确认标记**：每个 [`Write`] 都带有一个 [`AckMarker`]。应用只需声明“要不要确认”，
//!   序号由阶段在转发时填入，传输层据此把完成/失败关联回具体写入；
//! - **透传原则**：阶段不认识的命令与事件一律原样转发。

use alloc::borrow::Cow;
use bytes::Bytes;

/// 写入携带的确认标记。
///
/// # 契约说明（What）
/// - `NoAck(None)` 为应用侧默认值；阶段转发时改写为 `NoAck(Some(seq))`，
///   即便不请求确认也保留序号，以便失败事件能关联回去；
/// - `Ack(None)` 表示应用希望在写入落地后收到通知；转发时改写为 `Ack(Some(seq))`；
/// - `Probe` 为阶段内部的探测写标记，其完成事件只用于驱动恢复读取，永不上送；
/// - `Custom` 为应用自带的自定义标记。阶段不支持自定义负载，会记录告警并按 `Ack(None)` 处理。
///
/// # 风险提示（Trade-offs）
/// - 应用若自行填写 `Ack(Some(_))`/`NoAck(Some(_))`，其中的数字会被忽略并重新编号。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AckMarker {
    NoAck(Option<u64>),
    Ack(Option<u64>),
    Probe,
    Custom(Cow<'static, str>),
}

impl AckMarker {
    /// 是否为应用侧的默认“无需确认”标记。
    pub fn is_default(&self) -> bool {
        matches!(self, AckMarker::NoAck(_))
    }

    /// 若标记由阶段打过序号，返回该序号。
    pub fn sequence(&self) -> Option<u64> {
        match self {
            AckMarker::NoAck(seq) | AckMarker::Ack(seq) => *seq,
            AckMarker::Probe | AckMarker::Custom(_) => None,
        }
    }
}

impl Default for AckMarker {
    fn default() -> Self {
        AckMarker::NoAck(None)
    }
}

/// 一次出站写入。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Write {
    pub payload: Bytes,
    pub ack: AckMarker,
}

impl Write {
    /// 不需要确认的写入。
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ack: AckMarker::default(),
        }
    }

    /// 希望在落地后收到确认的写入。
    pub fn with_ack(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ack: AckMarker::Ack(None),
        }
    }

    /// 使用任意标记构造写入。
    pub fn with_marker(payload: impl Into<Bytes>, ack: AckMarker) -> Self {
        Self {
            payload: payload.into(),
            ack,
        }
    }

    /// 零负载探测写。
    pub fn probe() -> Self {
        Self {
            payload: Bytes::new(),
            ack: AckMarker::Probe,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// 下行命令（应用 → 传输层）。
///
/// `SuspendReading`/`ResumeReading`/`ResumeWriting` 由阶段自身产生；若上游也发送它们，阶段照常透传。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Write(Write),
    SuspendReading,
    ResumeReading,
    ResumeWriting,
    Flush,
    Close,
}

impl Command {
    /// 低基数的命令名，用于日志字段。
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Write(_) => "write",
            Command::SuspendReading => "suspend_reading",
            Command::ResumeReading => "resume_reading",
            Command::ResumeWriting => "resume_writing",
            Command::Flush => "flush",
            Command::Close => "close",
        }
    }
}

impl From<Write> for Command {
    fn from(write: Write) -> Self {
        Command::Write(write)
    }
}

/// 上行事件（传输层 → 应用）。
///
/// # 契约说明（What）
/// - `Acked`：传输层对带 `Ack(Some(seq))` 或 `Probe` 标记写入的完成通知；
///   阶段向上游转交的应用确认也使用该变体，形如 `Acked(Ack(Some(seq)))`；
/// - `CommandFailed`：传输层拒绝了某条命令，写入失败时内含原写入及其标记；
/// - `WritingResumed`：传输层已清空积压，可再次接受写入；
/// - 其余变体与流控无关，原样上送。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Acked(AckMarker),
    CommandFailed(Command),
    WritingResumed,
    Received(Bytes),
    PeerClosed,
    Closed,
}

impl Event {
    /// 低基数的事件名，用于日志字段。
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Acked(_) => "acked",
            Event::CommandFailed(_) => "command_failed",
            Event::WritingResumed => "writing_resumed",
            Event::Received(_) => "received",
            Event::PeerClosed => "peer_closed",
            Event::Closed => "closed",
        }
    }
}
