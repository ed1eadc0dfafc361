//! 块写入（set block，SB）发起方状态机
//!
//! 请求 → 数据突发（位图驱动的选择性重传）→ 延迟后的状态请求 →
//! 报告 → 补发缺失帧或中止 → 中止 ACK。
//!
//! 中止帧有两种起因：传输成功完成，或报告重试耗尽。二者由
//! `done && 位图全置位` 区分，并决定中止 ACK 到来时发射的终止事件。

use crate::engine::Engine;
use crate::error::{DriverError, SendBlockError};
use crate::event::CanTsEvent;
use crate::timer::TimerKind;
use crate::transfer::{BlockRxState, BlockTxState, SetBlockTransfer, StartAddress};
use cants_can::SendErrorReason;
use cants_protocol::{CanTsFrame, SetBlockFrameType, bitmap, to_le_bytes_trimmed};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// 单次块传输的最大数据量（64 帧 × 8 字节）
pub(crate) const MAX_BLOCK_DATA: usize = 512;

impl Engine {
    /// 发起块写入传输。
    pub(crate) fn send_block(
        &mut self,
        address: u8,
        start_address: u64,
        data: &[u8],
        retry_count: u8,
        report_delay: Duration,
        report_retry_count: u8,
    ) -> Result<(), DriverError> {
        if !self.running {
            return Err(DriverError::NotRunning);
        }

        if CanTsFrame::is_broadcast_address(address) {
            error!("Invalid to address = {:#04x}", address);
            return Err(DriverError::InvalidAddress(address));
        }

        if self.sb_transfers.iter().any(|t| t.address == address) {
            error!("Transfer already active to address = {:#04x}", address);
            return Err(DriverError::TransferActive);
        }

        if data.is_empty() || data.len() > MAX_BLOCK_DATA {
            error!(
                "Invalid data length = {} to address = {:#04x}",
                data.len(),
                address
            );
            return Err(DriverError::InvalidLength(data.len()));
        }

        let blocks = ((data.len() + 7) / 8) as u8;
        let start: StartAddress = to_le_bytes_trimmed(start_address, true).into();
        let frame = CanTsFrame::set_block_request(address, self.address, blocks - 1, &start);

        if !self.send_frame(&frame) {
            error!("Failed sending request frame to address = {:#04x}", address);
            self.emit(CanTsEvent::SendBlockFailed {
                address,
                error: SendBlockError::SendRequestFailed,
            });
            return Err(DriverError::SendRefused);
        }

        self.sb_transfers.push(SetBlockTransfer {
            address,
            start,
            data: data.to_vec(),
            bitmap: vec![0; bitmap::num_bytes(blocks)],
            blocks,
            done: false,
            retry_count: 0,
            max_retries: retry_count,
            report_retry_count: 0,
            max_report_retries: report_retry_count,
            report_delay,
            tx_state: BlockTxState::SendingRequest,
            rx_state: BlockRxState::Idle,
            watchdog: None,
            report_delay_timer: None,
        });

        debug!(
            "Starting send (set) block transfer to address = {:#04x} memory address = {:#x} \
             blocks = {} retry_count = {} report_delay = {:?} report_retry_count = {}",
            address, start_address, blocks, retry_count, report_delay, report_retry_count
        );
        Ok(())
    }

    fn sb_position(&self, address: u8) -> Option<usize> {
        self.sb_transfers.iter().position(|t| t.address == address)
    }

    /// 中止起因：true 表示成功路径（done 且位图全置位）。
    fn sb_abort_is_success(&self, index: usize) -> bool {
        let transfer = &self.sb_transfers[index];
        transfer.done && bitmap::all_set(&transfer.bitmap, transfer.blocks)
    }

    /// 构造序号 `sequence` 的数据帧。
    fn sb_transfer_frame(&self, index: usize, sequence: u8) -> CanTsFrame {
        let transfer = &self.sb_transfers[index];
        CanTsFrame::set_block_transfer(
            transfer.address,
            self.address,
            sequence,
            transfer.chunk(sequence),
        )
    }

    fn sb_retry_request(&mut self, index: usize) {
        let address = self.sb_transfers[index].address;

        if self.sb_transfers[index].retry_count > self.sb_transfers[index].max_retries {
            error!("Max retries reached to address = {:#04x}", address);
            self.remove_sb(index);
            self.emit(CanTsEvent::SendBlockFailed {
                address,
                error: SendBlockError::MaxSendRequestRetriesReached,
            });
            return;
        }

        let frame = CanTsFrame::set_block_request(
            address,
            self.address,
            self.sb_transfers[index].blocks - 1,
            &self.sb_transfers[index].start,
        );
        if !self.send_frame(&frame) {
            error!("Failed retrying request frame to address = {:#04x}", address);
            self.remove_sb(index);
            self.emit(CanTsEvent::SendBlockFailed {
                address,
                error: SendBlockError::SendRequestFailed,
            });
        } else {
            self.sb_transfers[index].tx_state = BlockTxState::SendingRequest;
            debug!("Retrying request frame to address = {:#04x}", address);
        }
    }

    fn sb_retry_status(&mut self, index: usize) {
        let address = self.sb_transfers[index].address;

        if self.sb_transfers[index].retry_count > self.sb_transfers[index].max_retries {
            error!("Max retries reached to address = {:#04x}", address);
            self.remove_sb(index);
            self.emit(CanTsEvent::SendBlockFailed {
                address,
                error: SendBlockError::MaxSendStatusRetriesReached,
            });
            return;
        }

        let frame = CanTsFrame::set_block_status(address, self.address);
        if !self.send_frame(&frame) {
            error!("Failed retrying status frame to address = {:#04x}", address);
            self.remove_sb(index);
            self.emit(CanTsEvent::SendBlockFailed {
                address,
                error: SendBlockError::SendStatusRequestFailed,
            });
        } else {
            self.sb_transfers[index].tx_state = BlockTxState::SendingStatusRequest;
            debug!("Retrying status frame to address = {:#04x}", address);
        }
    }

    fn sb_retry_abort(&mut self, index: usize) {
        let address = self.sb_transfers[index].address;
        let success_path = self.sb_abort_is_success(index);

        if self.sb_transfers[index].retry_count > self.sb_transfers[index].max_retries {
            error!("Max retries reached to address = {:#04x}", address);
            self.remove_sb(index);
            self.emit(CanTsEvent::SendBlockFailed {
                address,
                error: if success_path {
                    SendBlockError::MaxSendAbortRetriesReached
                } else {
                    SendBlockError::MaxReportRetriesReached
                },
            });
            return;
        }

        let frame = CanTsFrame::set_block_abort(address, self.address);
        if !self.send_frame(&frame) {
            error!("Failed retrying abort frame to address = {:#04x}", address);
            self.remove_sb(index);
            self.emit(CanTsEvent::SendBlockFailed {
                address,
                error: if success_path {
                    SendBlockError::SendAbortFailed
                } else {
                    SendBlockError::MaxReportRetriesReached
                },
            });
        } else {
            self.sb_transfers[index].tx_state = BlockTxState::SendingAbort;
            debug!("Retrying abort frame to address = {:#04x}", address);
        }
    }

    /// 看门狗到期：等待中止 ACK 时重试中止，其余等待态重试状态请求。
    pub(crate) fn sb_timeout(&mut self, address: u8) {
        let Some(index) = self.sb_position(address) else {
            return;
        };

        let was_waiting_abort =
            self.sb_transfers[index].rx_state == BlockRxState::WaitingForAbortAck;
        self.sb_transfers[index].watchdog = None;
        self.sb_transfers[index].rx_state = BlockRxState::Idle;
        error!("SB transfer timeout to address = {:#04x}", address);

        if was_waiting_abort {
            self.sb_retry_abort(index);
        } else {
            self.sb_retry_status(index);
        }
    }

    /// 报告延迟到期：发送状态请求。
    pub(crate) fn sb_report_delay_timeout(&mut self, address: u8) {
        let Some(index) = self.sb_position(address) else {
            return;
        };

        self.sb_transfers[index].report_delay_timer = None;

        let frame = CanTsFrame::set_block_status(address, self.address);
        if !self.send_frame(&frame) {
            error!("Failed sending status frame to address = {:#04x}", address);
            self.remove_sb(index);
            self.emit(CanTsEvent::SendBlockFailed {
                address,
                error: SendBlockError::SendStatusRequestFailed,
            });
        } else {
            self.sb_transfers[index].tx_state = BlockTxState::SendingStatusRequest;
            debug!("Sending status frame to address = {:#04x}", address);
        }
    }

    /// 进入等待响应状态：武装看门狗并递增请求计数。
    fn sb_wait_for_response(&mut self, index: usize, rx_state: BlockRxState, now: Instant) {
        let address = self.sb_transfers[index].address;
        let watchdog = self
            .timers
            .start(TimerKind::SbWatchdog { address }, now + self.timeout);
        let transfer = &mut self.sb_transfers[index];
        transfer.watchdog = Some(watchdog);
        transfer.tx_state = BlockTxState::Idle;
        transfer.rx_state = rx_state;
        transfer.retry_count += 1;
    }

    pub(crate) fn sb_frame_sent(&mut self, frame: &CanTsFrame, now: Instant) {
        let to_address = frame.to_address;
        let Some(index) = self.sb_position(to_address) else {
            debug!("Transfer not active to address = {:#04x}", to_address);
            return;
        };

        let tx_state = self.sb_transfers[index].tx_state;
        match (frame.sb_frame_type(), tx_state) {
            (Some(SetBlockFrameType::Request), BlockTxState::SendingRequest) => {
                debug!("Request frame sent to address = {:#04x}", to_address);
                self.sb_wait_for_response(index, BlockRxState::WaitingForRequestAck, now);
            },
            (Some(SetBlockFrameType::Status), BlockTxState::SendingStatusRequest) => {
                debug!("Status frame sent to address = {:#04x}", to_address);
                self.sb_wait_for_response(index, BlockRxState::WaitingForData, now);
            },
            (Some(SetBlockFrameType::Abort), BlockTxState::SendingAbort) => {
                debug!("Abort frame sent to address = {:#04x}", to_address);
                self.sb_wait_for_response(index, BlockRxState::WaitingForAbortAck, now);
            },
            (Some(SetBlockFrameType::Transfer), BlockTxState::SendingData) => {
                let tx_sequence = frame.block_cmd_bits();
                debug!(
                    "Transfer frame sent to address = {:#04x} sequence = {}",
                    to_address, tx_sequence
                );
                bitmap::set_bit(&mut self.sb_transfers[index].bitmap, tx_sequence);

                // 找到下一个尚未发送的数据帧
                let blocks = self.sb_transfers[index].blocks;
                let next = (tx_sequence + 1..blocks)
                    .find(|&seq| !bitmap::is_bit_set(&self.sb_transfers[index].bitmap, seq));

                match next {
                    Some(sequence) => {
                        let data_frame = self.sb_transfer_frame(index, sequence);
                        if !self.send_frame(&data_frame) {
                            error!(
                                "Failed sending transfer frame to address = {:#04x} sequence = {}",
                                to_address, sequence
                            );
                            self.remove_sb(index);
                            self.emit(CanTsEvent::SendBlockFailed {
                                address: to_address,
                                error: SendBlockError::SendDataFailed,
                            });
                        } else {
                            debug!(
                                "Sending transfer frame to address = {:#04x} sequence = {}",
                                to_address, sequence
                            );
                        }
                    },
                    None => {
                        // 全部数据帧已发送，延迟一段时间后请求状态报告
                        let delay = self.sb_transfers[index].report_delay;
                        let timer = self.timers.start(
                            TimerKind::SbReportDelay {
                                address: to_address,
                            },
                            now + delay,
                        );
                        let transfer = &mut self.sb_transfers[index];
                        transfer.report_delay_timer = Some(timer);
                        transfer.tx_state = BlockTxState::WaitingForSendStatusRequest;
                    },
                }
            },
            _ => {},
        }
    }

    pub(crate) fn sb_send_error(&mut self, frame: &CanTsFrame, reason: SendErrorReason) {
        let to_address = frame.to_address;
        let Some(index) = self.sb_position(to_address) else {
            return;
        };

        error!(
            "Failed sending frame to address = {:#04x} reason = {:?}",
            to_address, reason
        );

        let error = match frame.sb_frame_type() {
            Some(SetBlockFrameType::Request) => SendBlockError::SendRequestFailed,
            Some(SetBlockFrameType::Status) => SendBlockError::SendStatusRequestFailed,
            Some(SetBlockFrameType::Transfer) => SendBlockError::SendDataFailed,
            Some(SetBlockFrameType::Abort) => {
                if self.sb_abort_is_success(index) {
                    SendBlockError::SendAbortFailed
                } else {
                    SendBlockError::MaxReportRetriesReached
                }
            },
            _ => return,
        };
        self.remove_sb(index);
        self.emit(CanTsEvent::SendBlockFailed {
            address: to_address,
            error,
        });
    }

    pub(crate) fn sb_frame_received(&mut self, frame: &CanTsFrame, now: Instant) {
        let from_address = frame.from_address;
        let Some(index) = self.sb_position(from_address) else {
            error!("Transfer not active from address = {:#04x}", from_address);
            return;
        };

        match frame.sb_frame_type() {
            Some(SetBlockFrameType::Ack) => self.sb_received_ack(index, frame),
            Some(SetBlockFrameType::Nack) => self.sb_received_nack(index, frame),
            Some(SetBlockFrameType::Report) => self.sb_received_report(index, frame, now),
            other => {
                error!(
                    "Received invalid frame type from address = {:#04x} type = {:?}",
                    from_address, other
                );
            },
        }
    }

    fn sb_received_ack(&mut self, index: usize, frame: &CanTsFrame) {
        let from_address = frame.from_address;
        let cmd_bits = frame.block_cmd_bits();

        match self.sb_transfers[index].rx_state {
            BlockRxState::WaitingForRequestAck => {
                // 请求 ACK 必须回显块数与裁剪后的起始地址（按字节比较）
                let transfer = &self.sb_transfers[index];
                if cmd_bits + 1 != transfer.blocks || frame.data() != &transfer.start[..] {
                    error!(
                        "Invalid request ACK response from address = {:#04x} blocks = {}",
                        from_address, cmd_bits
                    );
                    return;
                }

                if let Some(id) = self.sb_transfers[index].watchdog.take() {
                    self.timers.cancel(id);
                }
                self.sb_transfers[index].retry_count = 0;
                debug!("Received request frame ACK from address = {:#04x}", from_address);

                // 开始数据突发：发送序号 0
                let data_frame = self.sb_transfer_frame(index, 0);
                if !self.send_frame(&data_frame) {
                    error!("Failed sending transfer frame to address = {:#04x}", from_address);
                    self.remove_sb(index);
                    self.emit(CanTsEvent::SendBlockFailed {
                        address: from_address,
                        error: SendBlockError::SendDataFailed,
                    });
                } else {
                    let transfer = &mut self.sb_transfers[index];
                    transfer.tx_state = BlockTxState::SendingData;
                    transfer.rx_state = BlockRxState::Idle;
                    debug!("Sending transfer frame to address = {:#04x} sequence = 0", from_address);
                }
            },
            BlockRxState::WaitingForAbortAck => {
                if cmd_bits != 0 || frame.data_len() != 0 {
                    debug!(
                        "Invalid abort frame ACK response from address = {:#04x} sequence = {}",
                        from_address, cmd_bits
                    );
                    return;
                }

                if let Some(id) = self.sb_transfers[index].watchdog.take() {
                    self.timers.cancel(id);
                }
                debug!("Received abort frame ACK from address = {:#04x}", from_address);

                if self.sb_abort_is_success(index) {
                    self.remove_sb(index);
                    self.emit(CanTsEvent::SendBlockCompleted {
                        address: from_address,
                    });
                } else {
                    self.remove_sb(index);
                    self.emit(CanTsEvent::SendBlockFailed {
                        address: from_address,
                        error: SendBlockError::MaxReportRetriesReached,
                    });
                }
            },
            _ => {
                error!("Unexpected ACK from address = {:#04x}", from_address);
            },
        }
    }

    fn sb_received_nack(&mut self, index: usize, frame: &CanTsFrame) {
        let from_address = frame.from_address;

        // NACK 帧的命令位与数据必须为空
        if frame.block_cmd_bits() != 0 || frame.data_len() != 0 {
            debug!(
                "Invalid NACK from address = {:#04x} sequence = {}",
                from_address,
                frame.block_cmd_bits()
            );
            return;
        }

        match self.sb_transfers[index].rx_state {
            BlockRxState::WaitingForRequestAck => {
                if let Some(id) = self.sb_transfers[index].watchdog.take() {
                    self.timers.cancel(id);
                }
                self.sb_transfers[index].rx_state = BlockRxState::Idle;
                error!("Received request frame NACK from address = {:#04x}", from_address);
                self.sb_retry_request(index);
            },
            BlockRxState::WaitingForData => {
                if let Some(id) = self.sb_transfers[index].watchdog.take() {
                    self.timers.cancel(id);
                }
                self.sb_transfers[index].rx_state = BlockRxState::Idle;
                error!("Received status frame NACK from address = {:#04x}", from_address);
                self.sb_retry_status(index);
            },
            BlockRxState::WaitingForAbortAck => {
                if let Some(id) = self.sb_transfers[index].watchdog.take() {
                    self.timers.cancel(id);
                }
                error!("Received abort frame NACK from address = {:#04x}", from_address);

                let error = if self.sb_abort_is_success(index) {
                    SendBlockError::AbortNackReceived
                } else {
                    SendBlockError::MaxReportRetriesReached
                };
                self.remove_sb(index);
                self.emit(CanTsEvent::SendBlockFailed {
                    address: from_address,
                    error,
                });
            },
            _ => {
                error!("Unexpected NACK from address = {:#04x}", from_address);
            },
        }
    }

    fn sb_received_report(&mut self, index: usize, frame: &CanTsFrame, now: Instant) {
        let from_address = frame.from_address;
        let done_bit = frame.done_bit();
        let blocks = self.sb_transfers[index].blocks;

        if self.sb_transfers[index].rx_state != BlockRxState::WaitingForData {
            error!("Unexpected report frame from address = {:#04x}", from_address);
            return;
        }

        let report = frame.data();
        let report_all_set = bitmap::is_valid(report, blocks) && bitmap::all_set(report, blocks);

        if !bitmap::is_valid(report, blocks) || (done_bit && !report_all_set) {
            error!(
                "Received report frame with invalid bitmap from address = {:#04x} done = {}",
                from_address, done_bit
            );
            return;
        }

        if let Some(id) = self.sb_transfers[index].watchdog.take() {
            self.timers.cancel(id);
        }
        {
            let transfer = &mut self.sb_transfers[index];
            transfer.retry_count = 0;
            transfer.bitmap = report.to_vec();
            transfer.done = done_bit;
        }
        debug!(
            "Received report frame from address = {:#04x} done = {}",
            from_address, done_bit
        );

        if done_bit {
            // 成功：全部数据已被远端确认，发送中止结束传输
            self.sb_send_abort_after_report(index, from_address);
        } else if report_all_set {
            // 位图全置位但远端尚未置 done：重新请求状态报告
            if self.sb_transfers[index].report_retry_count
                > self.sb_transfers[index].max_report_retries
            {
                self.sb_send_abort_after_report(index, from_address);
            } else {
                let delay = self.sb_transfers[index].report_delay;
                let timer = self.timers.start(
                    TimerKind::SbReportDelay {
                        address: from_address,
                    },
                    now + delay,
                );
                let transfer = &mut self.sb_transfers[index];
                transfer.report_retry_count += 1;
                transfer.report_delay_timer = Some(timer);
                transfer.tx_state = BlockTxState::WaitingForSendStatusRequest;
                transfer.rx_state = BlockRxState::Idle;
            }
        } else {
            // 部分数据缺失：补发缺失帧或放弃
            if self.sb_transfers[index].report_retry_count
                > self.sb_transfers[index].max_report_retries
            {
                self.sb_send_abort_after_report(index, from_address);
            } else {
                // 一个报告周期只计一次重试
                {
                    let transfer = &mut self.sb_transfers[index];
                    transfer.report_retry_count += 1;
                    transfer.tx_state = BlockTxState::SendingData;
                    transfer.rx_state = BlockRxState::Idle;
                }
                for sequence in 0..blocks {
                    if bitmap::is_bit_set(&self.sb_transfers[index].bitmap, sequence) {
                        continue;
                    }
                    let data_frame = self.sb_transfer_frame(index, sequence);
                    if !self.send_frame(&data_frame) {
                        error!(
                            "Failed sending transfer frame to address = {:#04x} sequence = {}",
                            from_address, sequence
                        );
                        self.remove_sb(index);
                        self.emit(CanTsEvent::SendBlockFailed {
                            address: from_address,
                            error: SendBlockError::SendDataFailed,
                        });
                        return;
                    }
                    debug!(
                        "Sending transfer frame to address = {:#04x} sequence = {}",
                        from_address, sequence
                    );
                }
            }
        }
    }

    /// 收到报告后发送中止帧。失败时按中止起因选择终止事件。
    fn sb_send_abort_after_report(&mut self, index: usize, address: u8) {
        let success_path = self.sb_abort_is_success(index);
        let frame = CanTsFrame::set_block_abort(address, self.address);

        if !self.send_frame(&frame) {
            error!("Failed sending abort frame to address = {:#04x}", address);
            self.remove_sb(index);
            self.emit(CanTsEvent::SendBlockFailed {
                address,
                error: if success_path {
                    SendBlockError::SendAbortFailed
                } else {
                    SendBlockError::MaxReportRetriesReached
                },
            });
        } else {
            let transfer = &mut self.sb_transfers[index];
            transfer.tx_state = BlockTxState::SendingAbort;
            transfer.rx_state = BlockRxState::Idle;
            debug!("Sending abort frame to address = {:#04x}", address);
        }
    }
}
