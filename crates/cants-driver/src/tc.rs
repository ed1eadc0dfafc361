//! 遥控（TC）发起方状态机
//!
//! 发送请求 → 等待 ACK/NACK → 超时或 NACK 时重试，直至成功或
//! 重试耗尽。`retry_count` 在每次成功交付后自增，守卫
//! `retry_count > max_retries` 允许总计 `max_retries + 1` 次请求。

use crate::engine::Engine;
use crate::error::{DriverError, SendTcError};
use crate::event::CanTsEvent;
use crate::timer::TimerKind;
use crate::transfer::{RequestRxState, RequestTxState, TelecommandTransfer};
use cants_can::SendErrorReason;
use cants_protocol::{CanTsFrame, TelecommandFrameType};
use std::time::Instant;
use tracing::{debug, error};

impl Engine {
    /// 发起遥控传输。
    pub(crate) fn send_tc(
        &mut self,
        address: u8,
        channel: u8,
        data: &[u8],
        retry_count: u8,
    ) -> Result<(), DriverError> {
        if !self.running {
            return Err(DriverError::NotRunning);
        }

        if CanTsFrame::is_broadcast_address(address) {
            error!("Invalid address = {:#04x} channel = {}", address, channel);
            return Err(DriverError::InvalidAddress(address));
        }

        if self
            .tc_transfers
            .iter()
            .any(|t| t.address == address && t.channel == channel)
        {
            error!(
                "Transfer already active to address = {:#04x} channel = {}",
                address, channel
            );
            return Err(DriverError::TransferActive);
        }

        if data.len() > 8 {
            error!(
                "Invalid data length = {} to address = {:#04x} channel = {}",
                data.len(),
                address,
                channel
            );
            return Err(DriverError::InvalidLength(data.len()));
        }

        let frame = CanTsFrame::telecommand_request(address, self.address, channel, data);
        if !self.send_frame(&frame) {
            error!(
                "Sending frame failed to address = {:#04x} channel = {}",
                address, channel
            );
            self.emit(CanTsEvent::SendTcFailed {
                address,
                channel,
                error: SendTcError::SendRequestFailed,
            });
            return Err(DriverError::SendRefused);
        }

        self.tc_transfers.push(TelecommandTransfer {
            address,
            channel,
            data: data.to_vec(),
            retry_count: 0,
            max_retries: retry_count,
            tx_state: RequestTxState::SendingRequest,
            rx_state: RequestRxState::Idle,
            watchdog: None,
        });

        debug!(
            "Starting TC transfer to address = {:#04x} channel = {} retry_count = {}",
            address, channel, retry_count
        );
        Ok(())
    }

    fn tc_retry(&mut self, index: usize) {
        let address = self.tc_transfers[index].address;
        let channel = self.tc_transfers[index].channel;

        if self.tc_transfers[index].retry_count > self.tc_transfers[index].max_retries {
            error!(
                "Max retries reached to address = {:#04x} channel = {}",
                address, channel
            );
            self.remove_tc(index);
            self.emit(CanTsEvent::SendTcFailed {
                address,
                channel,
                error: SendTcError::MaxRetriesReached,
            });
            return;
        }

        let frame = CanTsFrame::telecommand_request(
            address,
            self.address,
            channel,
            &self.tc_transfers[index].data,
        );
        if !self.send_frame(&frame) {
            error!(
                "Failed sending TC retry to address = {:#04x} channel = {}",
                address, channel
            );
            self.remove_tc(index);
            self.emit(CanTsEvent::SendTcFailed {
                address,
                channel,
                error: SendTcError::SendRequestFailed,
            });
        } else {
            self.tc_transfers[index].tx_state = RequestTxState::SendingRequest;
            debug!(
                "Sending TC retry to address = {:#04x} channel = {}",
                address, channel
            );
        }
    }

    /// 看门狗到期：回到空闲接收态并执行重试策略。
    pub(crate) fn tc_timeout(&mut self, address: u8, channel: u8) {
        let Some(index) = self
            .tc_transfers
            .iter()
            .position(|t| t.address == address && t.channel == channel)
        else {
            return;
        };

        self.tc_transfers[index].watchdog = None;
        self.tc_transfers[index].rx_state = RequestRxState::Idle;
        error!(
            "TC ACK timeout address = {:#04x} channel = {}",
            address, channel
        );
        self.tc_retry(index);
    }

    /// 请求帧交付确认：武装看门狗并进入等待 ACK 状态。
    pub(crate) fn tc_frame_sent(&mut self, frame: &CanTsFrame, now: Instant) {
        let channel = frame.channel();
        let to_address = frame.to_address;

        let Some(index) = self.tc_transfers.iter().position(|t| {
            t.address == to_address
                && t.channel == channel
                && t.tx_state == RequestTxState::SendingRequest
        }) else {
            return;
        };

        let watchdog = self.timers.start(
            TimerKind::TcWatchdog {
                address: to_address,
                channel,
            },
            now + self.timeout,
        );
        let transfer = &mut self.tc_transfers[index];
        transfer.watchdog = Some(watchdog);
        transfer.rx_state = RequestRxState::WaitingForRequestAck;
        transfer.tx_state = RequestTxState::Idle;
        transfer.retry_count += 1;
        debug!(
            "Sent TC frame to address = {:#04x} channel = {}",
            to_address, channel
        );
    }

    /// 链路层交付失败：终止传输。
    pub(crate) fn tc_send_error(&mut self, frame: &CanTsFrame, reason: SendErrorReason) {
        let channel = frame.channel();
        let to_address = frame.to_address;

        let Some(index) = self.tc_transfers.iter().position(|t| {
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
        self.remove_tc(index);
        self.emit(CanTsEvent::SendTcFailed {
            address: to_address,
            channel,
            error: SendTcError::SendRequestFailed,
        });
    }

    /// 处理收到的遥控帧（ACK/NACK）。
    pub(crate) fn tc_frame_received(&mut self, frame: &CanTsFrame) {
        let channel = frame.channel();
        let from_address = frame.from_address;

        let Some(index) = self.tc_transfers.iter().position(|t| {
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
                self.remove_tc(index);
                self.emit(CanTsEvent::SendTcCompleted {
                    address: from_address,
                    channel,
                });
                debug!(
                    "Received TC ACK from address = {:#04x} channel = {}",
                    from_address, channel
                );
            },
            Some(TelecommandFrameType::Nack) => {
                if let Some(id) = self.tc_transfers[index].watchdog.take() {
                    self.timers.cancel(id);
                }
                self.tc_transfers[index].rx_state = RequestRxState::Idle;
                error!(
                    "Received TC NACK from address = {:#04x} channel = {}",
                    from_address, channel
                );
                self.tc_retry(index);
            },
            _ => {
                debug!(
                    "Ignoring TC frame from address = {:#04x} command = {:#05x}",
                    from_address, frame.command
                );
            },
        }
    }
}
