//! 后台调度循环
//!
//! 引擎的单一调度上下文：两条链路的通知与定时器到期都在这里逐个
//! 送入 [`Engine`]，每个事件运行到完成后才处理下一个。用户 API 调用
//! 通过同一把锁串行化，因此任何状态迁移都不会并发执行。

use crate::dispatch::CanBus;
use crate::engine::Engine;
use cants_can::LinkEvent;
use crossbeam_channel::{Receiver, select};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// 无定时器在飞时的等待上限，同时限定停机标志的响应延迟
const IDLE_POLL: Duration = Duration::from_millis(50);

pub(crate) fn dispatch_loop(
    ctx: Arc<Mutex<Engine>>,
    nominal_rx: Receiver<LinkEvent>,
    redundant_rx: Receiver<LinkEvent>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        let wait = ctx
            .lock()
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(IDLE_POLL)
            .min(IDLE_POLL);

        select! {
            recv(nominal_rx) -> event => match event {
                Ok(event) => {
                    ctx.lock().handle_link_event(CanBus::Nominal, event, Instant::now());
                },
                Err(_) => break,
            },
            recv(redundant_rx) -> event => match event {
                Ok(event) => {
                    ctx.lock().handle_link_event(CanBus::Redundant, event, Instant::now());
                },
                Err(_) => break,
            },
            default(wait) => {},
        }

        ctx.lock().poll_timers(Instant::now());
    }

    trace!("Dispatch loop exited");
}
