//! 块读取（get block，GB）发起方状态机
//!
//! 请求 → START（携带待取帧位图）→ 接收数据帧（逐帧清位）→
//! 中止 → 中止 ACK。数据帧固定 8 字节，接收缓冲区为 `blocks * 8`。

use crate::engine::Engine;
use crate::error::{DriverError, ReceiveBlockError};
use crate::event::CanTsEvent;
use crate::timer::TimerKind;
use crate::transfer::{BlockRxState, BlockTxState, GetBlockTransfer, StartAddress};
use cants_can::SendErrorReason;
use cants_protocol::{CanTsFrame, GetBlockFrameType, bitmap, to_le_bytes_trimmed};
use std::time::Instant;
use tracing::{debug, error};

/// 序号字段为 6 位，单次块读取至多 64 帧
pub(crate) const MAX_BLOCKS: u8 = 64;

impl Engine {
    /// 发起块读取传输。`length` 为要读取的 8 字节数据帧数量。
    pub(crate) fn receive_block(
        &mut self,
        address: u8,
        start_address: u64,
        length: u8,
        retry_count: u8,
        start_retry_count: u8,
    ) -> Result<(), DriverError> {
        if !self.running {
            return Err(DriverError::NotRunning);
        }

        if CanTsFrame::is_broadcast_address(address) {
            error!("Invalid address = {:#04x}", address);
            return Err(DriverError::InvalidAddress(address));
        }

        if self.gb_transfers.iter().any(|t| t.address == address) {
            error!("Transfer already active to address = {:#04x}", address);
            return Err(DriverError::TransferActive);
        }

        if length < 1 || length > MAX_BLOCKS {
            error!("Invalid length = {}", length);
            return Err(DriverError::InvalidLength(usize::from(length)));
        }

        let start: StartAddress = to_le_bytes_trimmed(start_address, true).into();
        let frame = CanTsFrame::get_block_request(address, self.address, length - 1, &start);

        if !self.send_frame(&frame) {
            error!("Failed sending request frame to address = {:#04x}", address);
            self.emit(CanTsEvent::ReceiveBlockFailed {
                address,
                error: ReceiveBlockError::SendRequestFailed,
            });
            return Err(DriverError::SendRefused);
        }

        let mut pending = vec![0u8; bitmap::num_bytes(length)];
        bitmap::set_first_n(&mut pending, length);

        self.gb_transfers.push(GetBlockTransfer {
            address,
            start,
            data: vec![0; usize::from(length) * 8],
            bitmap: pending,
            blocks: length,
            retry_count: 0,
            max_retries: retry_count,
            start_retry_count: 0,
            max_start_retries: start_retry_count,
            tx_state: BlockTxState::SendingRequest,
            rx_state: BlockRxState::Idle,
            watchdog: None,
        });

        debug!(
            "Starting receive (get) block transfer to address = {:#04x} memory address = {:#x} \
             length = {} retry_count = {} start_retry_count = {}",
            address, start_address, length, retry_count, start_retry_count
        );
        Ok(())
    }

    fn gb_position(&self, address: u8) -> Option<usize> {
        self.gb_transfers.iter().position(|t| t.address == address)
    }

    fn gb_retry_request(&mut self, index: usize) {
        let address = self.gb_transfers[index].address;

        if self.gb_transfers[index].retry_count > self.gb_transfers[index].max_retries {
            error!("Max retries reached to address = {:#04x}", address);
            self.remove_gb(index);
            self.emit(CanTsEvent::ReceiveBlockFailed {
                address,
                error: ReceiveBlockError::MaxSendRequestRetriesReached,
            });
            return;
        }

        let frame = CanTsFrame::get_block_request(
            address,
            self.address,
            self.gb_transfers[index].blocks - 1,
            &self.gb_transfers[index].start,
        );
        if !self.send_frame(&frame) {
            error!("Failed retrying request frame to address = {:#04x}", address);
            self.remove_gb(index);
            self.emit(CanTsEvent::ReceiveBlockFailed {
                address,
                error: ReceiveBlockError::SendRequestFailed,
            });
        } else {
            self.gb_transfers[index].tx_state = BlockTxState::SendingRequest;
            debug!("Retrying block request to address = {:#04x}", address);
        }
    }

    fn gb_retry_start(&mut self, index: usize) {
        let address = self.gb_transfers[index].address;

        if self.gb_transfers[index].start_retry_count > self.gb_transfers[index].max_start_retries {
            // START 重试耗尽：中止传输；终止事件在中止 ACK 到来时按
            // start_retry_count 判定为 MaxSendStartRetriesReached
            error!("Max start retries reached to address = {:#04x}", address);

            let frame = CanTsFrame::get_block_abort(address, self.address);
            if !self.send_frame(&frame) {
                error!("Failed sending abort frame to address = {:#04x}", address);
                self.remove_gb(index);
                self.emit(CanTsEvent::ReceiveBlockFailed {
                    address,
                    error: ReceiveBlockError::SendAbortFailed,
                });
            } else {
                self.gb_transfers[index].tx_state = BlockTxState::SendingAbort;
                debug!("Sending abort frame to address = {:#04x}", address);
            }
            return;
        }

        let frame =
            CanTsFrame::get_block_start(address, self.address, &self.gb_transfers[index].bitmap);
        if !self.send_frame(&frame) {
            error!("Failed sending start frame to address = {:#04x}", address);
            self.remove_gb(index);
            self.emit(CanTsEvent::ReceiveBlockFailed {
                address,
                error: ReceiveBlockError::SendStartFailed,
            });
        } else {
            self.gb_transfers[index].tx_state = BlockTxState::SendingStart;
            debug!("Retrying start frame to address = {:#04x}", address);
        }
    }

    fn gb_retry_abort(&mut self, index: usize) {
        let address = self.gb_transfers[index].address;

        if self.gb_transfers[index].retry_count > self.gb_transfers[index].max_retries {
            error!("Max abort retries reached to address = {:#04x}", address);
            self.remove_gb(index);
            self.emit(CanTsEvent::ReceiveBlockFailed {
                address,
                error: ReceiveBlockError::MaxSendAbortRetriesReached,
            });
            return;
        }

        let frame = CanTsFrame::get_block_abort(address, self.address);
        if !self.send_frame(&frame) {
            error!("Failed sending abort frame to address = {:#04x}", address);
            self.remove_gb(index);
            self.emit(CanTsEvent::ReceiveBlockFailed {
                address,
                error: ReceiveBlockError::SendAbortFailed,
            });
        } else {
            self.gb_transfers[index].tx_state = BlockTxState::SendingAbort;
            debug!("Retrying abort frame to address = {:#04x}", address);
        }
    }

    /// 看门狗到期：等待中止 ACK 时重试中止，其余等待态重试请求。
    pub(crate) fn gb_timeout(&mut self, address: u8) {
        let Some(index) = self.gb_position(address) else {
            return;
        };

        let was_waiting_abort =
            self.gb_transfers[index].rx_state == BlockRxState::WaitingForAbortAck;
        self.gb_transfers[index].watchdog = None;
        self.gb_transfers[index].rx_state = BlockRxState::Idle;
        error!("GB transfer timeout to address = {:#04x}", address);

        if was_waiting_abort {
            self.gb_retry_abort(index);
        } else {
            self.gb_retry_request(index);
        }
    }

    pub(crate) fn gb_frame_sent(&mut self, frame: &CanTsFrame, now: Instant) {
        let to_address = frame.to_address;
        let Some(index) = self.gb_position(to_address) else {
            debug!("Transfer not active to address = {:#04x}", to_address);
            return;
        };

        let deadline = now + self.timeout;
        let tx_state = self.gb_transfers[index].tx_state;
        match (frame.gb_frame_type(), tx_state) {
            (Some(GetBlockFrameType::Request), BlockTxState::SendingRequest) => {
                let watchdog = self
                    .timers
                    .start(TimerKind::GbWatchdog { address: to_address }, deadline);
                let transfer = &mut self.gb_transfers[index];
                transfer.watchdog = Some(watchdog);
                transfer.tx_state = BlockTxState::Idle;
                transfer.rx_state = BlockRxState::WaitingForRequestAck;
                transfer.retry_count += 1;
                debug!("Request frame sent to address = {:#04x}", to_address);
            },
            (Some(GetBlockFrameType::Abort), BlockTxState::SendingAbort) => {
                let watchdog = self
                    .timers
                    .start(TimerKind::GbWatchdog { address: to_address }, deadline);
                let transfer = &mut self.gb_transfers[index];
                transfer.watchdog = Some(watchdog);
                transfer.tx_state = BlockTxState::Idle;
                transfer.rx_state = BlockRxState::WaitingForAbortAck;
                transfer.retry_count += 1;
                debug!("Abort frame sent to address = {:#04x}", to_address);
            },
            (Some(GetBlockFrameType::Start), BlockTxState::SendingStart) => {
                let watchdog = self
                    .timers
                    .start(TimerKind::GbWatchdog { address: to_address }, deadline);
                let transfer = &mut self.gb_transfers[index];
                transfer.watchdog = Some(watchdog);
                transfer.tx_state = BlockTxState::Idle;
                transfer.rx_state = BlockRxState::WaitingForData;
                transfer.start_retry_count += 1;
                debug!("Start frame sent to address = {:#04x}", to_address);
            },
            _ => {},
        }
    }

    pub(crate) fn gb_send_error(&mut self, frame: &CanTsFrame, reason: SendErrorReason) {
        let to_address = frame.to_address;
        let Some(index) = self.gb_position(to_address) else {
            error!("Transfer not active to address = {:#04x}", to_address);
            return;
        };

        error!(
            "Frame send failed to address = {:#04x} reason = {:?}",
            to_address, reason
        );

        let error = match frame.gb_frame_type() {
            Some(GetBlockFrameType::Request) => ReceiveBlockError::SendRequestFailed,
            Some(GetBlockFrameType::Abort) => ReceiveBlockError::SendAbortFailed,
            Some(GetBlockFrameType::Start) => ReceiveBlockError::SendStartFailed,
            _ => return,
        };
        self.remove_gb(index);
        self.emit(CanTsEvent::ReceiveBlockFailed {
            address: to_address,
            error,
        });
    }

    pub(crate) fn gb_frame_received(&mut self, frame: &CanTsFrame) {
        let from_address = frame.from_address;
        let Some(index) = self.gb_position(from_address) else {
            error!("Transfer not active from address = {:#04x}", from_address);
            return;
        };

        match frame.gb_frame_type() {
            Some(GetBlockFrameType::Ack) => self.gb_received_ack(index, frame),
            Some(GetBlockFrameType::Nack) => self.gb_received_nack(index, frame),
            Some(GetBlockFrameType::Transfer) => self.gb_received_transfer(index, frame),
            other => {
                error!(
                    "Unexpected frame type from address = {:#04x} type = {:?}",
                    from_address, other
                );
            },
        }
    }

    fn gb_received_ack(&mut self, index: usize, frame: &CanTsFrame) {
        let from_address = frame.from_address;
        let cmd_bits = frame.block_cmd_bits();

        match self.gb_transfers[index].rx_state {
            BlockRxState::WaitingForRequestAck => {
                // 请求 ACK 必须回显块数与裁剪后的起始地址（按字节比较）
                let transfer = &self.gb_transfers[index];
                if cmd_bits + 1 != transfer.blocks || frame.data() != &transfer.start[..] {
                    error!("Invalid GB request response from address = {:#04x}", from_address);
                    return;
                }

                if let Some(id) = self.gb_transfers[index].watchdog.take() {
                    self.timers.cancel(id);
                }
                self.gb_transfers[index].retry_count = 0;

                let start_frame = CanTsFrame::get_block_start(
                    from_address,
                    self.address,
                    &self.gb_transfers[index].bitmap,
                );
                if !self.send_frame(&start_frame) {
                    error!("Start frame send failed to address = {:#04x}", from_address);
                    self.remove_gb(index);
                    self.emit(CanTsEvent::ReceiveBlockFailed {
                        address: from_address,
                        error: ReceiveBlockError::SendStartFailed,
                    });
                } else {
                    let transfer = &mut self.gb_transfers[index];
                    transfer.tx_state = BlockTxState::SendingStart;
                    transfer.rx_state = BlockRxState::Idle;
                    debug!("Sending start frame to address = {:#04x}", from_address);
                }
            },
            BlockRxState::WaitingForAbortAck => {
                if cmd_bits != 0 || frame.data_len() != 0 {
                    error!("Invalid abort response from address = {:#04x}", from_address);
                    return;
                }

                if let Some(id) = self.gb_transfers[index].watchdog.take() {
                    self.timers.cancel(id);
                }
                debug!("Abort ACK received from address = {:#04x}", from_address);

                if self.gb_transfers[index].start_retry_count
                    > self.gb_transfers[index].max_start_retries
                {
                    self.remove_gb(index);
                    self.emit(CanTsEvent::ReceiveBlockFailed {
                        address: from_address,
                        error: ReceiveBlockError::MaxSendStartRetriesReached,
                    });
                } else {
                    let transfer = self.gb_transfers.remove(index);
                    self.emit(CanTsEvent::ReceiveBlockCompleted {
                        address: from_address,
                        data: transfer.data,
                    });
                }
            },
            _ => {
                error!("Unexpected ACK from address = {:#04x}", from_address);
            },
        }
    }

    fn gb_received_nack(&mut self, index: usize, frame: &CanTsFrame) {
        let from_address = frame.from_address;

        if frame.block_cmd_bits() != 0 || frame.data_len() != 0 {
            debug!("Invalid NACK received from address = {:#04x}", from_address);
            return;
        }

        match self.gb_transfers[index].rx_state {
            BlockRxState::WaitingForRequestAck => {
                if let Some(id) = self.gb_transfers[index].watchdog.take() {
                    self.timers.cancel(id);
                }
                self.gb_transfers[index].rx_state = BlockRxState::Idle;
                error!("NACK received from address = {:#04x}", from_address);
                self.gb_retry_request(index);
            },
            BlockRxState::WaitingForData => {
                if let Some(id) = self.gb_transfers[index].watchdog.take() {
                    self.timers.cancel(id);
                }
                self.gb_transfers[index].rx_state = BlockRxState::Idle;
                error!("NACK received from address = {:#04x}", from_address);
                self.gb_retry_start(index);
            },
            BlockRxState::WaitingForAbortAck => {
                if let Some(id) = self.gb_transfers[index].watchdog.take() {
                    self.timers.cancel(id);
                }
                error!("NACK received from address = {:#04x}", from_address);
                self.remove_gb(index);
                self.emit(CanTsEvent::ReceiveBlockFailed {
                    address: from_address,
                    error: ReceiveBlockError::AbortNackReceived,
                });
            },
            _ => {
                error!("Unexpected NACK from address = {:#04x}", from_address);
            },
        }
    }

    fn gb_received_transfer(&mut self, index: usize, frame: &CanTsFrame) {
        let from_address = frame.from_address;
        let sequence = frame.block_cmd_bits();
        let blocks = self.gb_transfers[index].blocks;

        // 数据帧必须为 8 字节且序号在范围内
        if frame.data_len() != 8 || sequence >= blocks {
            error!(
                "Invalid transfer frame from address = {:#04x} sequence = {}",
                from_address, sequence
            );
            return;
        }

        if !bitmap::is_bit_set(&self.gb_transfers[index].bitmap, sequence) {
            error!(
                "Frame already received from address = {:#04x} sequence = {}",
                from_address, sequence
            );
            return;
        }

        if let Some(id) = self.gb_transfers[index].watchdog.take() {
            self.timers.cancel(id);
        }
        {
            let transfer = &mut self.gb_transfers[index];
            transfer.retry_count = 0;
            bitmap::clear_bit(&mut transfer.bitmap, sequence);
            let begin = usize::from(sequence) * 8;
            transfer.data[begin..begin + 8].copy_from_slice(frame.data());
        }
        debug!(
            "Received transfer frame from address = {:#04x} sequence = {}",
            from_address, sequence
        );

        // 全部数据帧收齐后中止传输
        let transfer = &self.gb_transfers[index];
        if bitmap::all_cleared(&transfer.bitmap, blocks) {
            let abort = CanTsFrame::get_block_abort(from_address, self.address);
            if !self.send_frame(&abort) {
                error!("Sending abort failed to address = {:#04x}", from_address);
                self.remove_gb(index);
                self.emit(CanTsEvent::ReceiveBlockFailed {
                    address: from_address,
                    error: ReceiveBlockError::SendAbortFailed,
                });
            } else {
                let transfer = &mut self.gb_transfers[index];
                transfer.tx_state = BlockTxState::SendingAbort;
                transfer.rx_state = BlockRxState::Idle;
                debug!("Sending abort frame to address = {:#04x}", from_address);
            }
        }
    }
}
