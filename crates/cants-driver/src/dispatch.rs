//! 双总线调度
//!
//! 出站帧只经活动总线发送；入站帧按来源总线分类：活动总线上的帧
//! 完整分类（发给本节点 / 保活 / 时间同步 / 忽略），冗余总线只贡献
//! 保活观察。发送确认与发送错误只对活动总线有效。

use crate::engine::Engine;
use cants_can::{LinkEvent, SendErrorReason};
use cants_protocol::{ADDRESS_KEEP_ALIVE, ADDRESS_TIME_SYNC, CanFrame, CanTsFrame, TransferType};
use std::time::Instant;
use tracing::{debug, error, warn};

/// 可用的 CAN 总线
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanBus {
    /// 标称总线（总线 0）
    Nominal,
    /// 冗余总线（总线 1）
    Redundant,
}

impl CanBus {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Nominal => 0,
            Self::Redundant => 1,
        }
    }

    /// 另一条总线
    pub fn other(self) -> Self {
        match self {
            Self::Nominal => Self::Redundant,
            Self::Redundant => Self::Nominal,
        }
    }
}

impl Engine {
    /// 编码并经活动总线发送一帧。返回 true 表示驱动接收了该帧，
    /// 实际上线结果由之后的发送通知兑现。
    pub(crate) fn send_frame(&mut self, frame: &CanTsFrame) -> bool {
        debug!("Sending frame {:?}", frame);
        let can_frame = frame.to_can_frame();
        self.links[self.active_bus.index()].send(can_frame).is_ok()
    }

    /// 处理来自 `bus` 的一条链路通知。
    pub(crate) fn handle_link_event(&mut self, bus: CanBus, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::FrameSent(frame) => {
                // 发送确认只对活动总线有效
                if bus == self.active_bus {
                    self.frame_sent(&frame, now);
                }
            },
            LinkEvent::SendError(frame, reason) => {
                if bus == self.active_bus {
                    self.frame_send_error(&frame, reason);
                }
            },
            LinkEvent::FrameReceived(frame) => self.frame_received(bus, &frame, now),
        }
    }

    fn frame_sent(&mut self, can_frame: &CanFrame, now: Instant) {
        let frame = match CanTsFrame::from_can_frame(can_frame) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring sent frame: {}", e);
                return;
            },
        };

        debug!("Sent frame {:?}", frame);

        match frame.transfer_type {
            TransferType::Telecommand => self.tc_frame_sent(&frame, now),
            TransferType::Telemetry => self.tm_frame_sent(&frame, now),
            TransferType::SetBlock => self.sb_frame_sent(&frame, now),
            TransferType::GetBlock => self.gb_frame_sent(&frame, now),
            TransferType::TimeSync => self.ts_frame_sent(),
            TransferType::Unsolicited => self.un_frame_sent(&frame),
        }
    }

    fn frame_send_error(&mut self, can_frame: &CanFrame, reason: SendErrorReason) {
        let frame = match CanTsFrame::from_can_frame(can_frame) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring send error: {}", e);
                return;
            },
        };

        debug!("Failed sending frame {:?}", frame);

        match frame.transfer_type {
            TransferType::Telecommand => self.tc_send_error(&frame, reason),
            TransferType::Telemetry => self.tm_send_error(&frame, reason),
            TransferType::SetBlock => self.sb_send_error(&frame, reason),
            TransferType::GetBlock => self.gb_send_error(&frame, reason),
            TransferType::TimeSync => self.ts_send_error(reason),
            TransferType::Unsolicited => self.un_send_error(&frame, reason),
        }
    }

    fn frame_received(&mut self, bus: CanBus, can_frame: &CanFrame, now: Instant) {
        let frame = match CanTsFrame::from_can_frame(can_frame) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Dropping received frame: {}", e);
                return;
            },
        };

        debug!("Received frame {:?} on {:?}", frame, bus);

        if bus != self.active_bus {
            // 冗余总线上只关心保活传输
            if frame.to_address == ADDRESS_KEEP_ALIVE
                && frame.transfer_type == TransferType::Unsolicited
            {
                self.keep_alive_received(&frame, false);
            }
            return;
        }

        if frame.to_address == self.address {
            // 本节点是接收方
            match frame.transfer_type {
                TransferType::Telecommand => self.tc_frame_received(&frame),
                TransferType::Telemetry => self.tm_frame_received(&frame),
                TransferType::SetBlock => self.sb_frame_received(&frame, now),
                TransferType::GetBlock => self.gb_frame_received(&frame),
                TransferType::Unsolicited => self.un_frame_received(&frame),
                TransferType::TimeSync => {
                    error!("Invalid transfer type {:?}", frame.transfer_type);
                },
            }
        } else if frame.to_address == ADDRESS_KEEP_ALIVE
            && frame.transfer_type == TransferType::Unsolicited
        {
            // 保活传输
            self.keep_alive_received(&frame, true);
        } else if frame.to_address == ADDRESS_TIME_SYNC
            && frame.transfer_type == TransferType::TimeSync
        {
            // 时间同步传输
            self.ts_frame_received(&frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{LOCAL, stack};
    use crate::transfer::{RequestRxState, RequestTxState};

    #[test]
    fn test_basic_and_rtr_frames_dropped() {
        let mut stack = stack();

        let basic = CanFrame {
            id: 0x123,
            extended: false,
            rtr: false,
            data: [0; 8],
            len: 0,
        };
        stack.engine.handle_link_event(
            CanBus::Nominal,
            cants_can::LinkEvent::FrameReceived(basic),
            stack.now,
        );

        let mut rtr = CanTsFrame::telecommand_ack(LOCAL, 0x20, 0).to_can_frame();
        rtr.rtr = true;
        stack.engine.handle_link_event(
            CanBus::Nominal,
            cants_can::LinkEvent::FrameReceived(rtr),
            stack.now,
        );

        assert!(stack.take_events().is_empty());
    }

    #[test]
    fn test_frame_to_other_address_ignored() {
        let mut stack = stack();
        stack.receive(CanTsFrame::unsolicited(0x33, 0x20, 0, &[]));
        assert!(stack.take_events().is_empty());
    }

    #[test]
    fn test_sent_confirm_from_standby_bus_ignored() {
        let mut stack = stack();
        stack.nominal.set_auto_confirm(false);
        stack.engine.send_tc(0x20, 0, &[0x01], 0).unwrap();

        // 交付确认来自冗余总线：不得推进状态机
        let sent = stack.nominal.take_sent();
        stack.engine.handle_link_event(
            CanBus::Redundant,
            cants_can::LinkEvent::FrameSent(sent[0]),
            stack.now,
        );

        let transfer = &stack.engine.tc_transfers[0];
        assert_eq!(transfer.tx_state, RequestTxState::SendingRequest);
        assert_eq!(transfer.rx_state, RequestRxState::Idle);
        assert!(transfer.watchdog.is_none());
    }
}
