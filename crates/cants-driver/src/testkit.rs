//! 单元测试公共设施
//!
//! 直接驱动 [`Engine`]（不经调度线程），配合回环链路与显式时刻，
//! 使状态机测试完全确定、无需真实睡眠。

use crate::dispatch::CanBus;
use crate::engine::Engine;
use crate::event::CanTsEvent;
use cants_can::{LinkDriver, LinkEvent, LinkSettings, LoopbackHandle, LoopbackLink};
use cants_protocol::CanTsFrame;
use crossbeam_channel::Receiver;
use std::time::{Duration, Instant};

/// 测试中的本地节点地址
pub(crate) const LOCAL: u8 = 0x10;
/// 测试中的响应超时
pub(crate) const TIMEOUT: Duration = Duration::from_millis(100);

pub(crate) struct TestStack {
    pub engine: Engine,
    pub nominal: LoopbackHandle,
    pub redundant: LoopbackHandle,
    nominal_rx: Receiver<LinkEvent>,
    redundant_rx: Receiver<LinkEvent>,
    events: Receiver<CanTsEvent>,
    pub now: Instant,
}

pub(crate) fn stack() -> TestStack {
    let (link0, handle0) = LoopbackLink::new();
    let (link1, handle1) = LoopbackLink::new();
    let nominal_rx = link0.notifications();
    let redundant_rx = link1.notifications();
    let (event_tx, events) = crossbeam_channel::unbounded();

    let mut engine = Engine::new([Box::new(link0), Box::new(link1)], event_tx);
    engine
        .start(
            LOCAL,
            TIMEOUT,
            &LinkSettings::SerialBridge {
                port_name_nominal: "loop0".to_string(),
                port_name_redundant: "loop1".to_string(),
                baud: 115_200,
            },
        )
        .unwrap();

    TestStack {
        engine,
        nominal: handle0,
        redundant: handle1,
        nominal_rx,
        redundant_rx,
        events,
        now: Instant::now(),
    }
}

impl TestStack {
    /// 把两条链路积压的通知按序送入引擎。
    pub fn pump(&mut self) {
        loop {
            let mut progressed = false;
            while let Ok(event) = self.nominal_rx.try_recv() {
                self.engine.handle_link_event(CanBus::Nominal, event, self.now);
                progressed = true;
            }
            while let Ok(event) = self.redundant_rx.try_recv() {
                self.engine.handle_link_event(CanBus::Redundant, event, self.now);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    /// 在活动（标称）总线上注入一条远端发来的帧。
    pub fn receive(&mut self, frame: CanTsFrame) {
        self.engine.handle_link_event(
            CanBus::Nominal,
            LinkEvent::FrameReceived(frame.to_can_frame()),
            self.now,
        );
        self.pump();
    }

    /// 推进虚拟时钟并分发到期定时器。
    pub fn advance(&mut self, duration: Duration) {
        self.now += duration;
        self.engine.poll_timers(self.now);
        self.pump();
    }

    /// 取出至今发射的全部事件。
    pub fn take_events(&self) -> Vec<CanTsEvent> {
        self.events.try_iter().collect()
    }

    /// 取出活动总线驱动收到的全部发送帧（解码后）。
    pub fn take_sent(&self) -> Vec<CanTsFrame> {
        self.nominal
            .take_sent()
            .iter()
            .map(|frame| CanTsFrame::from_can_frame(frame).unwrap())
            .collect()
    }
}
