use alloc::vec::Vec;

use crate::message::{Command, Event};

/// 阶段访问宿主 Pipeline 的唯一入口。
///
/// # 设计背景（Why）
/// - 与 `spark-core` 的 Handler `Context` 一脉相承，但流控阶段只需要两件事：
///   向下游发命令、向上游发事件。收窄接口后阶段可以脱离任何运行时单独测试。
///
/// # 契约说明（What）
/// - 两个方法均为同步、不可失败的转交；宿主负责保证转交顺序即调用顺序；
/// - 阶段在一次回调内可能多次调用这两个方法，宿主不得在回调期间重入阶段。
///
/// # 风险提示（Trade-offs）
/// - 若宿主实现内部使用有界队列，需要自行处理队列满的情况，阶段不会感知。
pub trait StageContext {
    /// 向下游（传输层方向）发送命令。
    fn send_downstream(&mut self, command: Command);

    /// 向上游（应用方向）发送事件。
    fn emit_upstream(&mut self, event: Event);
}

/// 阶段的一次输出，保留方向信息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output {
    Downstream(Command),
    Upstream(Event),
}

/// 把两个方向的输出按发生顺序记录到同一个列表里。
///
/// 适用于测试与嵌入式宿主：调用方可以在每次回调后 [`RecordingContext::drain`] 取走输出。
#[derive(Debug, Default)]
pub struct RecordingContext {
    outputs: Vec<Output>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按发生顺序查看尚未取走的输出。
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// 取走全部输出。
    pub fn drain(&mut self) -> Vec<Output> {
        core::mem::take(&mut self.outputs)
    }

    /// 仅下游命令，保持相对顺序。
    pub fn downstream(&self) -> Vec<&Command> {
        self.outputs
            .iter()
            .filter_map(|output| match output {
                Output::Downstream(command) => Some(command),
                Output::Upstream(_) => None,
            })
            .collect()
    }

    /// 仅上游事件，保持相对顺序。
    pub fn upstream(&self) -> Vec<&Event> {
        self.outputs
            .iter()
            .filter_map(|output| match output {
                Output::Upstream(event) => Some(event),
                Output::Downstream(_) => None,
            })
            .collect()
    }
}

impl StageContext for RecordingContext {
    fn send_downstream(&mut self, command: Command) {
        self.outputs.push(Output::Downstream(command));
    }

    fn emit_upstream(&mut self, event: Event) {
        self.outputs.push(Output::Upstream(event));
    }
}
