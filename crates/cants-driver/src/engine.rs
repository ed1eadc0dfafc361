//! 引擎核心状态
//!
//! [`Engine`] 持有两条链路驱动、活动总线选择器、四张传输注册表与
//! 定时器队列。所有状态迁移都在单一调度上下文中串行执行：外部
//! 事件（用户 API 调用、链路通知、定时器到期）逐个运行到完成，
//! 处理器内部没有挂起点。

use crate::dispatch::CanBus;
use crate::error::DriverError;
use crate::event::CanTsEvent;
use crate::timer::{TimerKind, TimerQueue};
use crate::transfer::{GetBlockTransfer, SetBlockTransfer, TelecommandTransfer, TelemetryTransfer};
use cants_can::{LinkDriver, LinkSettings};
use cants_protocol::CanTsFrame;
use crossbeam_channel::Sender;
use std::time::{Duration, Instant};
use tracing::{debug, error};

pub(crate) struct Engine {
    pub(crate) address: u8,
    pub(crate) timeout: Duration,
    pub(crate) active_bus: CanBus,
    pub(crate) running: bool,
    pub(crate) links: [Box<dyn LinkDriver>; 2],
    pub(crate) timers: TimerQueue,
    pub(crate) tc_transfers: Vec<TelecommandTransfer>,
    pub(crate) tm_transfers: Vec<TelemetryTransfer>,
    pub(crate) sb_transfers: Vec<SetBlockTransfer>,
    pub(crate) gb_transfers: Vec<GetBlockTransfer>,
    events: Sender<CanTsEvent>,
}

impl Engine {
    pub(crate) fn new(links: [Box<dyn LinkDriver>; 2], events: Sender<CanTsEvent>) -> Self {
        Self {
            address: 0,
            timeout: Duration::ZERO,
            active_bus: CanBus::Nominal,
            running: false,
            links,
            timers: TimerQueue::new(),
            tc_transfers: Vec::new(),
            tm_transfers: Vec::new(),
            sb_transfers: Vec::new(),
            gb_transfers: Vec::new(),
            events,
        }
    }

    /// 启动 CAN-TS 协议栈：校验本地地址、打开两条链路、选定标称
    /// 总线为活动总线。
    pub(crate) fn start(
        &mut self,
        address: u8,
        timeout: Duration,
        settings: &LinkSettings,
    ) -> Result<(), DriverError> {
        if CanTsFrame::is_broadcast_address(address) {
            error!("Invalid address {:#04x}", address);
            return Err(DriverError::InvalidAddress(address));
        }

        match settings {
            LinkSettings::SerialBridge {
                port_name_nominal,
                port_name_redundant,
                baud,
            } => {
                if let Err(e) = self.links[0].open(port_name_nominal, *baud) {
                    error!("Port open failed: {}", port_name_nominal);
                    return Err(e.into());
                }
                if let Err(e) = self.links[1].open(port_name_redundant, *baud) {
                    error!("Port open failed: {}", port_name_redundant);
                    self.links[0].close();
                    return Err(e.into());
                }
            },
            other => {
                error!("Unsupported link settings: {:?}", other);
                return Err(DriverError::UnsupportedSettings);
            },
        }

        self.address = address;
        self.timeout = timeout;
        self.active_bus = CanBus::Nominal;
        self.running = true;

        debug!(
            "Started CAN-TS stack with address = {:#04x}, timeout = {:?}",
            address, timeout
        );
        Ok(())
    }

    /// 静默停机：清空注册表（放弃在飞传输，不发射事件）并关闭两条链路。
    pub(crate) fn stop(&mut self) {
        self.clear_transfers();
        self.links[0].close();
        self.links[1].close();
        self.running = false;
        debug!("Stopped CAN-TS stack");
    }

    /// 在标称与冗余总线之间切换。所有在飞传输被放弃，不发射事件。
    pub(crate) fn bus_switch(&mut self) {
        self.clear_transfers();
        self.active_bus = self.active_bus.other();
        debug!("Bus switched, active bus = {:?}", self.active_bus);
    }

    pub(crate) fn local_address(&self) -> u8 {
        self.address
    }

    fn clear_transfers(&mut self) {
        self.tc_transfers.clear();
        self.tm_transfers.clear();
        self.sb_transfers.clear();
        self.gb_transfers.clear();
        // 定时器全部归传输所有，注册表清空后一并丢弃
        self.timers.clear();
    }

    pub(crate) fn emit(&self, event: CanTsEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// 分发所有到期的定时器。到期动作可能武装新的定时器或移除传输；
    /// 携带稳定键的 `TimerKind` 保证已移除的传输只会被无害地跳过。
    pub(crate) fn poll_timers(&mut self, now: Instant) {
        for (_id, kind) in self.timers.pop_expired(now) {
            match kind {
                TimerKind::TcWatchdog { address, channel } => self.tc_timeout(address, channel),
                TimerKind::TmWatchdog { address, channel } => self.tm_timeout(address, channel),
                TimerKind::SbWatchdog { address } => self.sb_timeout(address),
                TimerKind::SbReportDelay { address } => self.sb_report_delay_timeout(address),
                TimerKind::GbWatchdog { address } => self.gb_timeout(address),
            }
        }
    }

    // ------------------------------------------------------------------
    // 注册表维护
    // ------------------------------------------------------------------

    pub(crate) fn remove_tc(&mut self, index: usize) {
        let transfer = self.tc_transfers.remove(index);
        if let Some(id) = transfer.watchdog {
            self.timers.cancel(id);
        }
    }

    pub(crate) fn remove_tm(&mut self, index: usize) {
        let transfer = self.tm_transfers.remove(index);
        if let Some(id) = transfer.watchdog {
            self.timers.cancel(id);
        }
    }

    pub(crate) fn remove_sb(&mut self, index: usize) {
        let transfer = self.sb_transfers.remove(index);
        if let Some(id) = transfer.watchdog {
            self.timers.cancel(id);
        }
        if let Some(id) = transfer.report_delay_timer {
            self.timers.cancel(id);
        }
    }

    pub(crate) fn remove_gb(&mut self, index: usize) {
        let transfer = self.gb_transfers.remove(index);
        if let Some(id) = transfer.watchdog {
            self.timers.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::stack;

    #[test]
    fn test_bus_switch_abandons_transfers() {
        let mut stack = stack();
        stack.engine.send_tc(0x20, 0, &[0x01], 3).unwrap();
        stack.pump();
        assert_eq!(stack.engine.tc_transfers.len(), 1);
        assert_eq!(stack.engine.timers.len(), 1);

        stack.engine.bus_switch();
        assert_eq!(stack.engine.active_bus, CanBus::Redundant);
        assert!(stack.engine.tc_transfers.is_empty());
        assert_eq!(stack.engine.timers.len(), 0);
        // 被放弃的传输不发射事件
        assert!(stack.take_events().is_empty());

        // 切换后出站帧走冗余链路
        stack.engine.send_tc(0x20, 0, &[0x01], 3).unwrap();
        assert!(stack.nominal.take_sent().is_empty());
        assert_eq!(stack.redundant.take_sent().len(), 1);
    }

    #[test]
    fn test_stop_is_silent() {
        let mut stack = stack();
        stack.engine.send_tc(0x20, 0, &[0x01], 3).unwrap();
        stack.pump();
        stack.take_sent();

        stack.engine.stop();
        assert!(stack.take_events().is_empty());
        assert!(matches!(
            stack.engine.send_tc(0x20, 0, &[0x01], 0),
            Err(DriverError::NotRunning)
        ));
    }

    #[test]
    fn test_uniqueness_across_transfer_kinds() {
        let mut stack = stack();
        // 同一远端的四类传输互不冲突
        stack.engine.send_tc(0x20, 0, &[0x01], 0).unwrap();
        stack.engine.receive_tm(0x20, 0, 3).unwrap();
        stack
            .engine
            .send_block(0x20, 0, &[0x01], 3, Duration::from_millis(20), 3)
            .unwrap();
        stack.engine.receive_block(0x20, 0, 1, 3, 3).unwrap();

        // 但同类重复被拒绝
        assert!(stack.engine.send_block(0x20, 0, &[0x01], 3, Duration::from_millis(20), 3).is_err());
        assert!(stack.engine.receive_block(0x20, 0, 1, 3, 3).is_err());
    }
}
