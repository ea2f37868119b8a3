use alloc::collections::VecDeque;
use core::num::NonZeroU32;

use bytes::Bytes;
use tracing::{trace, warn};

use crate::{
    error::FlowControlError,
    message::{AckMarker, Event, Write},
};

const TARGET: &str = "spark.backpressure.queue";

/// 一次已转发（或已缓存）但尚未得到传输层结论的写入。
///
/// # 契约说明（What）
/// - `sequence`：入队时分配，在同一纪元内严格递增；
/// - `wants_upstream_ack`：应用是否要求在写入落地后收到通知；
/// - `downstream_ack_requested`：是否要求传输层为这条写入单独产生完成事件。
///   只要 `wants_upstream_ack` 为真它必为真；否则按 `ack_rate` 周期性强制为真。
///   缓存阶段追加的写入尚未发送，该字段为假。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingWrite {
    payload: Bytes,
    sequence: u64,
    wants_upstream_ack: bool,
    downstream_ack_requested: bool,
}

impl PendingWrite {
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn wants_upstream_ack(&self) -> bool {
        self.wants_upstream_ack
    }

    pub fn downstream_ack_requested(&self) -> bool {
        self.downstream_ack_requested
    }

    /// 还原为应用视角的写入，用于在新纪元中重放。
    ///
    /// 序号与下游确认策略都会在重放时重新计算，这里只保留应用的原始意图。
    pub fn into_replay(self) -> Write {
        let ack = if self.wants_upstream_ack {
            AckMarker::Ack(None)
        } else {
            AckMarker::NoAck(None)
        };
        Write::with_marker(self.payload, ack)
    }
}

/// 需要转交给上游应用的确认信号。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpstreamAck {
    pub sequence: u64,
}

impl UpstreamAck {
    pub fn into_event(self) -> Event {
        Event::Acked(AckMarker::Ack(Some(self.sequence)))
    }
}

/// 按序号排列的在途写入队列。
///
/// # 教案式说明
/// - **意图（Why）**：传输层的完成与失败是异步到达的，只能凭序号关联回具体写入。
///   队列维护“队首序号 + 连续无空洞的在途写入”，使任意完成事件都能 O(1) 判定新旧。
/// - **逻辑（How）**：
///   - 下一个序号恒为 `head + len`，因此队列里的序号必然是 `head, head+1, …`；
///   - `since_forced_ack` 统计自上次请求下游确认以来的写入数，达到 `ack_rate - 1`
///     时下一条写入强制请求确认，然后清零；
///   - 出队时先静默移除序号更小的条目，再按需移除目标条目并给出上游确认。
/// - **契约（What）**：
///   - 队列只属于当前活跃的状态，状态切换时要么整体交接、要么丢弃；
///   - 完成事件必须与写入顺序一致，否则 [`SequencedWriteQueue::dequeue`] 返回
///     [`FlowControlError::OutOfOrderCompletion`]。
/// - **风险提示（Trade-offs）**：序号运算假设单一写者；若宿主并行处理 I/O，需把同一连接的
///   全部命令与事件汇入同一个有序队列后再交给阶段。
#[derive(Debug)]
pub struct SequencedWriteQueue {
    head: u64,
    since_forced_ack: u32,
    ack_rate: NonZeroU32,
    items: VecDeque<PendingWrite>,
}

impl SequencedWriteQueue {
    /// 从序号 0 开始的新队列。
    pub fn new(ack_rate: NonZeroU32) -> Self {
        Self::starting_at(0, ack_rate)
    }

    /// 以给定队首序号开启新纪元，用于跨纪元延续编号。
    pub fn starting_at(head: u64, ack_rate: NonZeroU32) -> Self {
        Self {
            head,
            since_forced_ack: 0,
            ack_rate,
            items: VecDeque::new(),
        }
    }

    /// 最早一条仍在途写入的序号；队列为空时等于下一个将要分配的序号。
    pub fn head_sequence(&self) -> u64 {
        self.head
    }

    /// 下一条入队写入将获得的序号。
    pub fn next_sequence(&self) -> u64 {
        self.head + self.items.len() as u64
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ack_rate(&self) -> NonZeroU32 {
        self.ack_rate
    }

    /// 按序查看在途写入。
    pub fn iter(&self) -> impl Iterator<Item = &PendingWrite> {
        self.items.iter()
    }

    /// 入队一条写入，返回需要发往下游的带标记副本。
    ///
    /// # 契约说明（What）
    /// - 序号为 `head + len`；
    /// - 应用显式要求确认，或这是自上次强制确认以来的第 `ack_rate` 条写入时，
    ///   标记为 `Ack(Some(seq))` 并将计数清零；否则为 `NoAck(Some(seq))` 且计数加一；
    /// - 无论是否请求确认，返回的标记都携带序号，以便失败事件能关联回来。
    pub fn enqueue(&mut self, write: Write) -> Write {
        let sequence = self.next_sequence();
        let wants_upstream_ack = wants_ack(&write.ack, sequence);
        let downstream_ack_requested =
            wants_upstream_ack || self.since_forced_ack >= self.ack_rate.get() - 1;
        if downstream_ack_requested {
            self.since_forced_ack = 0;
        } else {
            self.since_forced_ack += 1;
        }

        trace!(
            target: TARGET,
            sequence,
            wants_upstream_ack,
            downstream_ack_requested,
            bytes = write.payload.len(),
            "write enqueued"
        );

        self.items.push_back(PendingWrite {
            payload: write.payload.clone(),
            sequence,
            wants_upstream_ack,
            downstream_ack_requested,
        });

        let ack = if downstream_ack_requested {
            AckMarker::Ack(Some(sequence))
        } else {
            AckMarker::NoAck(Some(sequence))
        };
        Write::with_marker(write.payload, ack)
    }

    /// 追加一条暂不发送的写入。
    ///
    /// 缓存期间写入不会触碰确认计数，序号与确认策略都会在重放时重新计算。
    pub fn hold(&mut self, write: Write) {
        let sequence = self.next_sequence();
        let wants_upstream_ack = wants_ack(&write.ack, sequence);
        trace!(target: TARGET, sequence, wants_upstream_ack, "write held for replay");
        self.items.push_back(PendingWrite {
            payload: write.payload,
            sequence,
            wants_upstream_ack,
            downstream_ack_requested: false,
        });
    }

    /// 确认序号不超过 `up_to` 的全部写入。
    ///
    /// # 契约说明（What）
    /// - 序号严格小于 `up_to` 的条目视为已成功且无人等待通知，直接移除；
    /// - 序号等于 `up_to` 的条目一并移除；若应用要求确认，返回 [`UpstreamAck`]；
    /// - `up_to == head - 1`：该条目已被先前的失败路径移除，属于迟到的陈旧事件，幂等返回 `None`；
    /// - 其余关系（落后超过一位，或超出已分配的最大序号）意味着完成事件乱序，返回致命错误且不修改队列。
    pub fn dequeue(&mut self, up_to: u64) -> Result<Option<UpstreamAck>, FlowControlError> {
        if up_to.checked_add(1) == Some(self.head) {
            return Ok(None);
        }
        if up_to < self.head || up_to >= self.next_sequence() {
            return Err(FlowControlError::OutOfOrderCompletion {
                head: self.head,
                sequence: up_to,
            });
        }

        let mut signal = None;
        while let Some(entry) = self.items.pop_front() {
            self.head = entry.sequence + 1;
            if entry.sequence == up_to {
                if entry.wants_upstream_ack {
                    signal = Some(UpstreamAck { sequence: up_to });
                }
                break;
            }
        }
        trace!(
            target: TARGET,
            up_to,
            head = self.head,
            remaining = self.items.len(),
            "writes completed"
        );
        Ok(signal)
    }

    /// 某条写入被传输层拒绝：其之前的全部写入均已成功。
    ///
    /// 等价于 `dequeue(sequence - 1)`；`sequence == head` 时前面没有任何条目，直接返回。
    pub fn dequeue_before(
        &mut self,
        sequence: u64,
    ) -> Result<Option<UpstreamAck>, FlowControlError> {
        if sequence == self.head {
            return Ok(None);
        }
        match sequence.checked_sub(1) {
            Some(previous) => self.dequeue(previous),
            None => Err(FlowControlError::OutOfOrderCompletion {
                head: self.head,
                sequence,
            }),
        }
    }

    /// 确认全部在途写入，返回最后一条的上游确认（若有）。
    pub fn dequeue_all(&mut self) -> Result<Option<UpstreamAck>, FlowControlError> {
        if self.items.is_empty() {
            return Ok(None);
        }
        self.dequeue(self.next_sequence() - 1)
    }

    /// 交出剩余写入，供新纪元按原顺序重放。
    pub fn into_pending(self) -> impl Iterator<Item = PendingWrite> {
        self.items.into_iter()
    }
}

fn wants_ack(marker: &AckMarker, sequence: u64) -> bool {
    match marker {
        AckMarker::NoAck(_) => false,
        AckMarker::Ack(_) => true,
        AckMarker::Custom(label) => {
            warn!(
                target: TARGET,
                sequence,
                marker = %label,
                "custom ack markers are not supported, treating as a plain ack request"
            );
            true
        }
        AckMarker::Probe => {
            warn!(
                target: TARGET,
                sequence,
                "probe marker supplied by the application, treating as a plain ack request"
            );
            true
        }
    }
}
