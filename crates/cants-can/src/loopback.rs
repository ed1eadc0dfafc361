//! 回环链路驱动
//!
//! 不依赖硬件的内存链路实现，用于集成测试与仿真。
//!
//! [`LoopbackHandle`] 扮演"远端 + 总线"的角色：可以读出驱动已接收
//! 的发送帧、兑现或否决发送承诺、以及向上层注入收到的帧。默认
//! 配置下每次 `send` 自动兑现为 [`LinkEvent::FrameSent`]。

use crate::{CanFrame, LinkDriver, LinkError, LinkEvent, SendErrorReason};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct LoopbackShared {
    open: AtomicBool,
    accept_sends: AtomicBool,
    auto_confirm: AtomicBool,
    fail_open: AtomicBool,
    sent: Mutex<VecDeque<CanFrame>>,
    port_name: Mutex<String>,
}

/// 回环链路驱动（实现 [`LinkDriver`]）
pub struct LoopbackLink {
    shared: Arc<LoopbackShared>,
    notify_tx: Sender<LinkEvent>,
    notify_rx: Receiver<LinkEvent>,
}

/// 回环链路的测试侧句柄
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<LoopbackShared>,
    notify_tx: Sender<LinkEvent>,
}

impl LoopbackLink {
    /// 创建驱动与配套句柄。
    pub fn new() -> (Self, LoopbackHandle) {
        let (notify_tx, notify_rx) = unbounded();
        let shared = Arc::new(LoopbackShared {
            open: AtomicBool::new(false),
            accept_sends: AtomicBool::new(true),
            auto_confirm: AtomicBool::new(true),
            fail_open: AtomicBool::new(false),
            sent: Mutex::new(VecDeque::new()),
            port_name: Mutex::new(String::new()),
        });
        let handle = LoopbackHandle {
            shared: shared.clone(),
            notify_tx: notify_tx.clone(),
        };
        (
            Self {
                shared,
                notify_tx,
                notify_rx,
            },
            handle,
        )
    }
}

impl LinkDriver for LoopbackLink {
    fn open(&mut self, port_name: &str, _baud: u32) -> Result<(), LinkError> {
        if self.shared.fail_open.load(Ordering::SeqCst) {
            return Err(LinkError::OpenFailed(port_name.to_string()));
        }
        *self.shared.port_name.lock().unwrap() = port_name.to_string();
        self.shared.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.shared.open.store(false, Ordering::SeqCst);
    }

    fn send(&mut self, frame: CanFrame) -> Result<(), LinkError> {
        if !self.shared.open.load(Ordering::SeqCst) {
            return Err(LinkError::NotOpen);
        }
        if !self.shared.accept_sends.load(Ordering::SeqCst) {
            return Err(LinkError::Busy);
        }
        self.shared.sent.lock().unwrap().push_back(frame);
        if self.shared.auto_confirm.load(Ordering::SeqCst) {
            let _ = self.notify_tx.send(LinkEvent::FrameSent(frame));
        }
        Ok(())
    }

    fn notifications(&self) -> Receiver<LinkEvent> {
        self.notify_rx.clone()
    }

    fn port_name(&self) -> String {
        self.shared.port_name.lock().unwrap().clone()
    }
}

impl LoopbackHandle {
    /// 控制 `send` 是否接受帧（false 时返回 `LinkError::Busy`）。
    pub fn set_accept_sends(&self, accept: bool) {
        self.shared.accept_sends.store(accept, Ordering::SeqCst);
    }

    /// 控制 `send` 是否自动兑现为 `FrameSent`（默认 true）。
    pub fn set_auto_confirm(&self, auto: bool) {
        self.shared.auto_confirm.store(auto, Ordering::SeqCst);
    }

    /// 控制 `open` 是否失败。
    pub fn set_fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::SeqCst);
    }

    /// 取出驱动至今接收的所有发送帧。
    pub fn take_sent(&self) -> Vec<CanFrame> {
        self.shared.sent.lock().unwrap().drain(..).collect()
    }

    /// 手动兑现一帧的发送承诺。
    pub fn confirm_sent(&self, frame: CanFrame) {
        let _ = self.notify_tx.send(LinkEvent::FrameSent(frame));
    }

    /// 以失败兑现一帧的发送承诺。
    pub fn emit_send_error(&self, frame: CanFrame, reason: SendErrorReason) {
        let _ = self.notify_tx.send(LinkEvent::SendError(frame, reason));
    }

    /// 向上层注入一条收到的帧。
    pub fn inject_frame(&self, frame: CanFrame) {
        let _ = self.notify_tx.send(LinkEvent::FrameReceived(frame));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u32) -> CanFrame {
        CanFrame::new_extended(id, &[0x01])
    }

    #[test]
    fn test_send_requires_open() {
        let (mut link, _handle) = LoopbackLink::new();
        assert!(matches!(link.send(frame(0x123)), Err(LinkError::NotOpen)));
    }

    #[test]
    fn test_send_auto_confirms() {
        let (mut link, handle) = LoopbackLink::new();
        link.open("loop0", 115_200).unwrap();
        let rx = link.notifications();

        link.send(frame(0x123)).unwrap();
        assert_eq!(rx.try_recv().unwrap(), LinkEvent::FrameSent(frame(0x123)));
        assert_eq!(handle.take_sent(), vec![frame(0x123)]);
    }

    #[test]
    fn test_send_refused_when_busy() {
        let (mut link, handle) = LoopbackLink::new();
        link.open("loop0", 115_200).unwrap();
        handle.set_accept_sends(false);
        assert!(matches!(link.send(frame(0x123)), Err(LinkError::Busy)));
        assert!(handle.take_sent().is_empty());
    }

    #[test]
    fn test_manual_confirm_and_inject() {
        let (mut link, handle) = LoopbackLink::new();
        link.open("loop0", 115_200).unwrap();
        handle.set_auto_confirm(false);
        let rx = link.notifications();

        link.send(frame(0x123)).unwrap();
        assert!(rx.try_recv().is_err());

        handle.emit_send_error(frame(0x123), SendErrorReason::DongleBusy);
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::SendError(frame(0x123), SendErrorReason::DongleBusy)
        );

        handle.inject_frame(frame(0x456));
        assert_eq!(rx.try_recv().unwrap(), LinkEvent::FrameReceived(frame(0x456)));
    }

    #[test]
    fn test_open_failure() {
        let (mut link, handle) = LoopbackLink::new();
        handle.set_fail_open(true);
        assert!(link.open("loop0", 115_200).is_err());
    }
}
