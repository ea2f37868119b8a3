//! 流控阶段端到端场景
//!
//! # 教案级注释概览
//! - **核心目标 (Why)**：以 [`RecordingContext`] 代替宿主 Pipeline，逐条喂入命令与事件，
//!   断言两个方向输出的相对顺序，覆盖“拒绝 → 缓冲 → 恢复写 → 重放 → 恢复读”的完整闭环。
//! - **合同与边界 (What)**：所有场景只依赖公开 API；序号、确认标记与命令顺序均按字面值断言。

use spark_backpressure::{
    AckMarker, BackpressureConfig, BackpressureStage, Command, Event, Output, Phase,
    RecordingContext, Write,
};
use tracing_test::traced_test;

fn stage(ack_rate: u32, low_watermark: Option<usize>) -> BackpressureStage {
    let config =
        BackpressureConfig::new(ack_rate, low_watermark).expect("测试配置必须合法");
    BackpressureStage::new(&config).expect("阶段构造失败")
}

fn write(stage: &mut BackpressureStage, ctx: &mut RecordingContext, w: Write) {
    stage
        .on_command(ctx, Command::Write(w))
        .expect("写入命令不应失败");
}

fn event(stage: &mut BackpressureStage, ctx: &mut RecordingContext, e: Event) {
    stage.on_event(ctx, e).expect("事件处理不应失败");
}

fn acked(seq: u64) -> Event {
    Event::Acked(AckMarker::Ack(Some(seq)))
}

fn failed(marker: AckMarker) -> Event {
    Event::CommandFailed(Command::Write(Write::with_marker("lost", marker)))
}

fn tagged(payload: &'static str, marker: AckMarker) -> Output {
    Output::Downstream(Command::Write(Write::with_marker(payload, marker)))
}

#[test]
fn flowing_tags_writes_by_ack_rate() {
    let mut stage = stage(3, None);
    let mut ctx = RecordingContext::new();
    for payload in ["w0", "w1", "w2", "w3", "w4"] {
        write(&mut stage, &mut ctx, Write::new(payload));
    }
    assert_eq!(
        ctx.drain(),
        vec![
            tagged("w0", AckMarker::NoAck(Some(0))),
            tagged("w1", AckMarker::NoAck(Some(1))),
            tagged("w2", AckMarker::Ack(Some(2))),
            tagged("w3", AckMarker::NoAck(Some(3))),
            tagged("w4", AckMarker::NoAck(Some(4))),
        ]
    );
    assert_eq!(stage.buffered(), 5);
}

#[test]
fn application_ack_is_delivered_upstream_on_completion() {
    let mut stage = stage(10, None);
    let mut ctx = RecordingContext::new();
    write(&mut stage, &mut ctx, Write::new("a"));
    write(&mut stage, &mut ctx, Write::with_ack("b"));
    assert_eq!(ctx.drain()[1], tagged("b", AckMarker::Ack(Some(1))));

    event(&mut stage, &mut ctx, acked(1));
    assert_eq!(ctx.drain(), vec![Output::Upstream(acked(1))]);
    assert_eq!(stage.buffered(), 0);
    assert_eq!(stage.head_sequence(), Some(2));
}

#[test]
fn rate_forced_completion_stays_internal() {
    let mut stage = stage(2, None);
    let mut ctx = RecordingContext::new();
    write(&mut stage, &mut ctx, Write::new("a"));
    write(&mut stage, &mut ctx, Write::new("b"));
    ctx.drain();

    event(&mut stage, &mut ctx, acked(1));
    assert!(ctx.outputs().is_empty(), "应用未请求确认时不得上送");
    assert_eq!(stage.buffered(), 0);
}

#[test]
fn failure_confirms_predecessors_and_absorbs_stale_rejections() {
    let mut stage = stage(5, None);
    let mut ctx = RecordingContext::new();
    for _ in 0..5 {
        write(&mut stage, &mut ctx, Write::new("warmup"));
    }
    event(&mut stage, &mut ctx, acked(4));
    assert_eq!(stage.head_sequence(), Some(5));

    for payload in ["w5", "w6", "w7"] {
        write(&mut stage, &mut ctx, Write::new(payload));
    }
    write(&mut stage, &mut ctx, Write::with_ack("w8"));
    write(&mut stage, &mut ctx, Write::new("w9"));
    ctx.drain();

    event(&mut stage, &mut ctx, failed(AckMarker::NoAck(Some(9))));
    assert_eq!(
        ctx.drain(),
        vec![
            Output::Upstream(acked(8)),
            Output::Downstream(Command::SuspendReading),
            Output::Downstream(Command::ResumeWriting),
        ]
    );
    assert_eq!(stage.phase(), Phase::Buffering);
    assert_eq!(stage.head_sequence(), Some(9));
    assert_eq!(stage.buffered(), 1);

    event(&mut stage, &mut ctx, failed(AckMarker::Ack(Some(8))));
    event(&mut stage, &mut ctx, failed(AckMarker::NoAck(Some(9))));
    assert!(ctx.outputs().is_empty());
    assert_eq!(stage.buffered(), 1);
}

#[test]
fn buffering_replays_in_order_then_probe_resumes_reads() {
    let mut stage = stage(2, None);
    let mut ctx = RecordingContext::new();
    write(&mut stage, &mut ctx, Write::new("w0"));
    write(&mut stage, &mut ctx, Write::new("w1"));
    ctx.drain();

    event(&mut stage, &mut ctx, failed(AckMarker::NoAck(Some(0))));
    assert_eq!(
        ctx.drain(),
        vec![
            Output::Downstream(Command::SuspendReading),
            Output::Downstream(Command::ResumeWriting),
        ],
        "挂起读取必须先于恢复写请求"
    );

    write(&mut stage, &mut ctx, Write::new("x"));
    write(&mut stage, &mut ctx, Write::with_ack("y"));
    event(&mut stage, &mut ctx, failed(AckMarker::Ack(Some(1))));
    assert!(ctx.outputs().is_empty(), "缓冲态不得转发写入");
    assert_eq!(stage.buffered(), 4);

    event(&mut stage, &mut ctx, Event::WritingResumed);
    assert_eq!(
        ctx.drain(),
        vec![
            tagged("w0", AckMarker::NoAck(Some(0))),
            tagged("w1", AckMarker::Ack(Some(1))),
            tagged("x", AckMarker::NoAck(Some(2))),
            tagged("y", AckMarker::Ack(Some(3))),
            Output::Downstream(Command::Write(Write::probe())),
        ]
    );
    assert_eq!(stage.phase(), Phase::Flowing);
    assert!(stage.is_read_suspended());

    event(&mut stage, &mut ctx, acked(1));
    event(&mut stage, &mut ctx, acked(3));
    assert_eq!(ctx.drain(), vec![Output::Upstream(acked(3))]);
    assert!(stage.is_read_suspended(), "未配置低水位时只靠探测写恢复");

    event(&mut stage, &mut ctx, Event::Acked(AckMarker::Probe));
    assert_eq!(ctx.drain(), vec![Output::Downstream(Command::ResumeReading)]);
    assert!(!stage.is_read_suspended());

    event(&mut stage, &mut ctx, Event::Acked(AckMarker::Probe));
    assert!(ctx.outputs().is_empty(), "探测确认永不上送");
}

#[test]
fn completions_while_buffering_leave_held_writes_for_replay() {
    let mut stage = stage(1, None);
    let mut ctx = RecordingContext::new();
    write(&mut stage, &mut ctx, Write::new("w0"));
    event(&mut stage, &mut ctx, failed(AckMarker::Ack(Some(0))));
    write(&mut stage, &mut ctx, Write::with_ack("held"));
    ctx.drain();

    event(&mut stage, &mut ctx, acked(1));
    event(&mut stage, &mut ctx, Event::Acked(AckMarker::Probe));
    assert!(ctx.downstream().is_empty());
    assert_eq!(ctx.upstream(), vec![&acked(1)], "完成事件原样上送，不额外生成确认");
    assert_eq!(stage.phase(), Phase::Buffering);
    assert_eq!(stage.buffered(), 2);
    ctx.drain();

    event(&mut stage, &mut ctx, Event::WritingResumed);
    assert_eq!(
        ctx.drain(),
        vec![
            tagged("w0", AckMarker::Ack(Some(0))),
            tagged("held", AckMarker::Ack(Some(1))),
            Output::Downstream(Command::Write(Write::probe())),
        ]
    );

    event(&mut stage, &mut ctx, acked(1));
    assert_eq!(ctx.drain(), vec![Output::Upstream(acked(1))]);
    assert_eq!(stage.buffered(), 0);
}

#[test]
fn late_completion_from_before_rejection_passes_through() {
    let mut stage = stage(1, None);
    let mut ctx = RecordingContext::new();
    for payload in ["a", "b", "c"] {
        write(&mut stage, &mut ctx, Write::new(payload));
    }
    event(&mut stage, &mut ctx, failed(AckMarker::Ack(Some(2))));
    assert_eq!(stage.head_sequence(), Some(2));
    ctx.drain();

    event(&mut stage, &mut ctx, acked(0));
    assert_eq!(ctx.drain(), vec![Output::Upstream(acked(0))]);
    assert_eq!(stage.phase(), Phase::Buffering);
    assert_eq!(stage.head_sequence(), Some(2));
}

#[test]
fn low_watermark_resumes_reads_before_probe() {
    let mut stage = stage(1, Some(2));
    let mut ctx = RecordingContext::new();
    write(&mut stage, &mut ctx, Write::new("a"));
    event(&mut stage, &mut ctx, failed(AckMarker::Ack(Some(0))));
    write(&mut stage, &mut ctx, Write::new("b"));
    write(&mut stage, &mut ctx, Write::new("c"));
    event(&mut stage, &mut ctx, Event::WritingResumed);
    ctx.drain();
    assert_eq!(stage.buffered(), 3);

    event(&mut stage, &mut ctx, acked(0));
    assert!(ctx.outputs().is_empty(), "在途数为 2 时尚未低于低水位");

    event(&mut stage, &mut ctx, acked(1));
    assert_eq!(ctx.drain(), vec![Output::Downstream(Command::ResumeReading)]);
    assert!(!stage.is_read_suspended());

    event(&mut stage, &mut ctx, Event::Acked(AckMarker::Probe));
    assert!(ctx.outputs().is_empty(), "读取已恢复，探测确认被吸收");
}

#[test]
fn second_rejection_while_suspended_skips_suspend_command() {
    let mut stage = stage(1, None);
    let mut ctx = RecordingContext::new();
    write(&mut stage, &mut ctx, Write::new("a"));
    event(&mut stage, &mut ctx, failed(AckMarker::Ack(Some(0))));
    event(&mut stage, &mut ctx, Event::WritingResumed);
    ctx.drain();

    event(&mut stage, &mut ctx, failed(AckMarker::Ack(Some(0))));
    assert_eq!(
        ctx.drain(),
        vec![Output::Downstream(Command::ResumeWriting)]
    );
    assert_eq!(stage.phase(), Phase::Buffering);
    assert_eq!(stage.buffered(), 1);
}

#[test]
fn sequence_numbers_continue_across_epochs() {
    let mut stage = stage(1, None);
    let mut ctx = RecordingContext::new();
    for payload in ["a", "b", "c"] {
        write(&mut stage, &mut ctx, Write::new(payload));
    }
    event(&mut stage, &mut ctx, acked(0));
    event(&mut stage, &mut ctx, failed(AckMarker::Ack(Some(2))));
    assert_eq!(stage.head_sequence(), Some(2));
    event(&mut stage, &mut ctx, Event::WritingResumed);
    ctx.drain();

    write(&mut stage, &mut ctx, Write::new("d"));
    assert_eq!(ctx.drain(), vec![tagged("d", AckMarker::Ack(Some(3)))]);
}

#[test]
fn buffering_passes_through_unrelated_traffic() {
    let mut stage = stage(1, None);
    let mut ctx = RecordingContext::new();
    write(&mut stage, &mut ctx, Write::new("a"));
    event(&mut stage, &mut ctx, failed(AckMarker::Ack(Some(0))));
    ctx.drain();

    stage.on_command(&mut ctx, Command::Flush).unwrap();
    event(&mut stage, &mut ctx, Event::Received("ping".into()));
    event(&mut stage, &mut ctx, Event::CommandFailed(Command::Close));
    assert_eq!(
        ctx.drain(),
        vec![
            Output::Downstream(Command::Flush),
            Output::Upstream(Event::Received("ping".into())),
            Output::Upstream(Event::CommandFailed(Command::Close)),
        ]
    );
}

#[test]
fn out_of_order_completion_poisons_stage() {
    let mut stage = stage(1, None);
    let mut ctx = RecordingContext::new();
    for payload in ["a", "b", "c", "d"] {
        write(&mut stage, &mut ctx, Write::new(payload));
    }
    event(&mut stage, &mut ctx, acked(2));
    let err = stage.on_event(&mut ctx, acked(0)).unwrap_err();
    assert_eq!(err.code(), "spark.backpressure.out_of_order_completion");
    assert_eq!(stage.phase(), Phase::Poisoned);
    assert!(stage.on_event(&mut ctx, acked(3)).is_err());
}

#[traced_test]
#[test]
fn custom_marker_is_logged_and_acknowledged() {
    let mut stage = stage(100, None);
    let mut ctx = RecordingContext::new();
    write(
        &mut stage,
        &mut ctx,
        Write::with_marker("c", AckMarker::Custom("order-42".into())),
    );
    assert_eq!(ctx.drain(), vec![tagged("c", AckMarker::Ack(Some(0)))]);
    assert!(logs_contain("custom ack markers are not supported"));

    event(&mut stage, &mut ctx, acked(0));
    assert_eq!(ctx.drain(), vec![Output::Upstream(acked(0))]);
}
