//! 遥测（TM）发起方状态机
//!
//! 与遥控共享同一形态：发送请求 → 等待 ACK/NACK → 超时或 NACK 时
//! 重试。ACK 帧的数据负载即请求的遥测值。

use crate::engine::Engine;
use crate::error::{DriverError, ReceiveTmError};
use crate::event::CanTsEvent;
use crate::timer::TimerKind;
use crate::transfer::{RequestRxState, RequestTxState, TelemetryTransfer};
use cants_can::SendErrorReason;
use cants_protocol::{CanTsFrame, TelecommandFrameType};
use std::time::Instant;
use tracing::{debug, error};

impl Engine {
    /// 发起遥测接收。
    pub(crate) fn receive_tm(
        &mut self,
        address: u8,
        channel: u8,
        retry_count: u8,
    ) -> Result<(), DriverError> {
        if !self.running {
            return Err(DriverError::NotRunning);
        }

        if CanTsFrame::is_broadcast_address(address) {
            error!("Invalid address = {:#04x}", address);
            return Err(DriverError::InvalidAddress(address));
        }

        if self
            .tm_transfers
            .iter()
            .any(|t| t.address == address && t.channel == channel)
        {
            error!(
                "Transfer already active to address = {:#04x} channel = {}",
                address, channel
            );
            return Err(DriverError::TransferActive);
        }

        let frame = CanTsFrame::telemetry_request(address, self.address, channel);
        if !self.send_frame(&frame) {
            error!(
                "Sending frame failed to address = {:#04x} channel = {}",
                address, channel
            );
            self.emit(CanTsEvent::ReceiveTmFailed {
                address,
                channel,
                error: ReceiveTmError::SendRequestFailed,
            });
            return Err(DriverError::SendRefused);
        }

        self.tm_transfers.push(TelemetryTransfer {
            address,
            channel,
            retry_count: 0,
            max_retries: retry_count,
            tx_state: RequestTxState::SendingRequest,
            rx_state: RequestRxState::Idle,
            watchdog: None,
        });

        debug!(
            "Starting TM transfer to address = {:#04x} channel = {} retry_count = {}",
            address, channel, retry_count
        );
        Ok(())
    }

    fn tm_retry(&mut self, index: usize) {
        let address = self.tm_transfers[index].address;
        let channel = self.tm_transfers[index].channel;

        if self.tm_transfers[index].retry_count > self.tm_transfers[index].max_retries {
            error!(
                "Max retries reached address = {:#04x} channel = {}",
                address, channel
            );
            self.remove_tm(index);
            self.emit(CanTsEvent::ReceiveTmFailed {
                address,
                channel,
                error: ReceiveTmError::MaxRetriesReached,
            });
            return;
        }

        let frame = CanTsFrame::telemetry_request(address, self.address, channel);
        if !self.send_frame(&frame) {
            error!(
                "Failed sending retry to address = {:#04x} channel = {}",
                address, channel
            );
            self.remove_tm(index);
            self.emit(CanTsEvent::ReceiveTmFailed {
                address,
                channel,
                error: ReceiveTmError::SendRequestFailed,
            });
        } else {
            self.tm_transfers[index].tx_state = RequestTxState::SendingRequest;
            debug!(
                "Sending TM retry to address = {:#04x} channel = {}",
                address, channel
            );
        }
    }

    pub(crate) fn tm_timeout(&mut self, address: u8, channel: u8) {
        let Some(index) = self
            .tm_transfers
            .iter()
            .position(|t| t.address == address && t.channel == channel)
        else {
            return;
        };

        self.tm_transfers[index].watchdog = None;
        self.tm_transfers[index].rx_state = RequestRxState::Idle;
        error!(
            "TM ACK timeout address = {:#04x} channel = {}",
            address, channel
        );
        self.tm_retry(index);
    }

    pub(crate) fn tm_frame_sent(&mut self, frame: &CanTsFrame, now: Instant) {
        let channel = frame.channel();
        let to_address = frame.to_address;

        let Some(index) = self.tm_transfers.iter().position(|t| {
            t.address == to_address
                && t.channel == channel
                && t.tx_state == RequestTxState::SendingRequest
        }) else {
            return;
        };

        let watchdog = self.timers.start(
            TimerKind::TmWatchdog {
                address: to_address,
                channel,
            },
            now + self.timeout,
        );
        let transfer = &mut self.tm_transfers[index];
        transfer.watchdog = Some(watchdog);
        transfer.rx_state = RequestRxState::WaitingForRequestAck;
        transfer.tx_state = RequestTxState::Idle;
        transfer.retry_count += 1;
        debug!(
            "Sent TM frame to address = {:#04x} channel = {}",
            to_address, channel
        );
    }

    pub(crate) fn tm_send_error(&mut self, frame: &CanTsFrame, reason: SendErrorReason) {
        let channel = frame.channel();
        let to_address = frame.to_address;

        let Some(index) = self.tm_transfers.iter().position(|t| {
            t.address == to_address
                && t.channel == channel
                && t.tx_state == RequestTxState::SendingRequest
        }) else {
            return;
        };

        error!(
            "Failed sending to address = {:#04x} channel = {} reason = {:?}",
            to_address, channel, reason
        );
        self.remove_tm(index);
        self.emit(CanTsEvent::ReceiveTmFailed {
            address: to_address,
            channel,
            error: ReceiveTmError::SendRequestFailed,
        });
    }

    pub(crate) fn tm_frame_received(&mut self, frame: &CanTsFrame) {
        let channel = frame.channel();
        let from_address = frame.from_address;

        let Some(index) = self.tm_transfers.iter().position(|t| {
            t.address == from_address
                && t.channel == channel
                && t.rx_state == RequestRxState::WaitingForRequestAck
        }) else {
            error!(
                "Received invalid frame (non active transfer) from address = {:#04x} channel = {}",
                from_address, channel
            );
            return;
        };

        match frame.tc_frame_type() {
            Some(TelecommandFrameType::Ack) => {
                self.remove_tm(index);
                self.emit(CanTsEvent::ReceiveTmCompleted {
                    address: from_address,
                    channel,
                    data: frame.data().to_vec(),
                });
                debug!(
                    "Received TM ACK from address = {:#04x} channel = {}",
                    from_address, channel
                );
            },
            Some(TelecommandFrameType::Nack) => {
                if let Some(id) = self.tm_transfers[index].watchdog.take() {
                    self.timers.cancel(id);
                }
                self.tm_transfers[index].rx_state = RequestRxState::Idle;
                error!(
                    "Received TM NACK from address = {:#04x} channel = {}",
                    from_address, channel
                );
                self.tm_retry(index);
            },
            _ => {
                debug!(
                    "Ignoring TM frame from address = {:#04x} command = {:#05x}",
                    from_address, frame.command
                );
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{LOCAL, TIMEOUT, stack};
    use std::time::Duration;

    #[test]
    fn test_tm_happy_path() {
        let mut stack = stack();
        stack.engine.receive_tm(0x20, 2, 3).unwrap();
        stack.pump();

        assert_eq!(
            stack.take_sent(),
            vec![CanTsFrame::telemetry_request(0x20, LOCAL, 2)]
        );

        stack.receive(CanTsFrame::telemetry_ack(LOCAL, 0x20, 2, &[0xAB, 0xCD]));

        assert_eq!(
            stack.take_events(),
            vec![CanTsEvent::ReceiveTmCompleted {
                address: 0x20,
                channel: 2,
                data: vec![0xAB, 0xCD],
            }]
        );
        assert!(stack.engine.tm_transfers.is_empty());
    }

    #[test]
    fn test_tm_retry_then_complete() {
        let mut stack = stack();
        stack.engine.receive_tm(0x20, 0, 3).unwrap();
        stack.pump();
        stack.take_sent();

        // 第一次超时触发重发
        stack.advance(TIMEOUT + Duration::from_millis(1));
        assert_eq!(
            stack.take_sent(),
            vec![CanTsFrame::telemetry_request(0x20, LOCAL, 0)]
        );

        stack.receive(CanTsFrame::telemetry_ack(LOCAL, 0x20, 0, &[0x01]));
        assert_eq!(
            stack.take_events(),
            vec![CanTsEvent::ReceiveTmCompleted {
                address: 0x20,
                channel: 0,
                data: vec![0x01],
            }]
        );
    }

    #[test]
    fn test_tm_max_retries() {
        let mut stack = stack();
        stack.engine.receive_tm(0x20, 0, 1).unwrap();
        stack.pump();

        stack.advance(TIMEOUT + Duration::from_millis(1));
        stack.advance(TIMEOUT + Duration::from_millis(1));

        assert_eq!(
            stack.take_events(),
            vec![CanTsEvent::ReceiveTmFailed {
                address: 0x20,
                channel: 0,
                error: ReceiveTmError::MaxRetriesReached,
            }]
        );
        assert!(stack.engine.tm_transfers.is_empty());
    }

    #[test]
    fn test_tm_nack_counts_against_retries() {
        let mut stack = stack();
        stack.engine.receive_tm(0x20, 0, 0).unwrap();
        stack.pump();

        // retry_count 已为 1，NACK 后守卫 1 > 0 直接失败
        stack.receive(CanTsFrame::telemetry_nack(LOCAL, 0x20, 0));
        assert_eq!(
            stack.take_events(),
            vec![CanTsEvent::ReceiveTmFailed {
                address: 0x20,
                channel: 0,
                error: ReceiveTmError::MaxRetriesReached,
            }]
        );
    }
}
