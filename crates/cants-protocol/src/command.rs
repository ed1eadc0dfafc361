//! 10 位命令字段的子字段布局
//!
//! 各传输类型的布局（bit 9 … bit 0）：
//!
//! ```text
//! TC/TM : _ _ ft[1:0] channel[7:0]
//! SB    : ft[2:0] done seq[5:0]
//! GB    : ft[2:0] _    seq[5:0]
//! UN    : _ _ _ _ _ _ _ _ channel[7:0]（高位为零）
//! TS    : command = 0
//! ```
//!
//! 构造时未使用的高位置零；解析时忽略。

use crate::frame::{ADDRESS_TIME_SYNC, CanTsFrame, TransferType};

const TC_FRAME_TYPE_SHIFT: u16 = 8;
const BLOCK_FRAME_TYPE_SHIFT: u16 = 7;
const BLOCK_DONE_BIT: u16 = 1 << 6;
const BLOCK_SEQ_MASK: u16 = 0x3F;

/// 遥控帧类型（command bits 9:8）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelecommandFrameType {
    Request = 0,
    Ack = 1,
    Nack = 2,
}

/// 遥测帧类型（command bits 9:8）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelemetryFrameType {
    Request = 0,
    Ack = 1,
    Nack = 2,
}

/// 块写入帧类型（command bits 9:7）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SetBlockFrameType {
    Request = 0,
    Transfer = 1,
    Ack = 2,
    Abort = 3,
    Nack = 4,
    Status = 6,
    Report = 7,
}

/// 块读取帧类型（command bits 9:7）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GetBlockFrameType {
    Request = 0,
    Ack = 2,
    Abort = 3,
    Nack = 4,
    Start = 6,
    Transfer = 7,
}

impl CanTsFrame {
    /// 构造遥控帧
    pub fn telecommand(
        to_address: u8,
        from_address: u8,
        frame_type: TelecommandFrameType,
        channel: u8,
        data: &[u8],
    ) -> Self {
        let command = (u16::from(frame_type as u8) << TC_FRAME_TYPE_SHIFT) | u16::from(channel);
        Self::new_raw(to_address, TransferType::Telecommand, from_address, command, data)
    }

    pub fn telecommand_request(to_address: u8, from_address: u8, channel: u8, data: &[u8]) -> Self {
        Self::telecommand(to_address, from_address, TelecommandFrameType::Request, channel, data)
    }

    pub fn telecommand_ack(to_address: u8, from_address: u8, channel: u8) -> Self {
        Self::telecommand(to_address, from_address, TelecommandFrameType::Ack, channel, &[])
    }

    pub fn telecommand_nack(to_address: u8, from_address: u8, channel: u8) -> Self {
        Self::telecommand(to_address, from_address, TelecommandFrameType::Nack, channel, &[])
    }

    /// 构造遥测帧
    pub fn telemetry(
        to_address: u8,
        from_address: u8,
        frame_type: TelemetryFrameType,
        channel: u8,
        data: &[u8],
    ) -> Self {
        let command = (u16::from(frame_type as u8) << TC_FRAME_TYPE_SHIFT) | u16::from(channel);
        Self::new_raw(to_address, TransferType::Telemetry, from_address, command, data)
    }

    pub fn telemetry_request(to_address: u8, from_address: u8, channel: u8) -> Self {
        Self::telemetry(to_address, from_address, TelemetryFrameType::Request, channel, &[])
    }

    pub fn telemetry_ack(to_address: u8, from_address: u8, channel: u8, data: &[u8]) -> Self {
        Self::telemetry(to_address, from_address, TelemetryFrameType::Ack, channel, data)
    }

    pub fn telemetry_nack(to_address: u8, from_address: u8, channel: u8) -> Self {
        Self::telemetry(to_address, from_address, TelemetryFrameType::Nack, channel, &[])
    }

    /// 构造块写入帧。`done` 位仅在 REPORT 帧中有意义。
    pub fn set_block(
        to_address: u8,
        from_address: u8,
        frame_type: SetBlockFrameType,
        done: bool,
        sequence: u8,
        data: &[u8],
    ) -> Self {
        let command = (u16::from(frame_type as u8) << BLOCK_FRAME_TYPE_SHIFT)
            | (if done { BLOCK_DONE_BIT } else { 0 })
            | (u16::from(sequence) & BLOCK_SEQ_MASK);
        Self::new_raw(to_address, TransferType::SetBlock, from_address, command, data)
    }

    /// 块写入请求。`frame_number` 为块数减一，`address` 为裁剪后的起始地址。
    pub fn set_block_request(
        to_address: u8,
        from_address: u8,
        frame_number: u8,
        address: &[u8],
    ) -> Self {
        Self::set_block(
            to_address,
            from_address,
            SetBlockFrameType::Request,
            false,
            frame_number,
            address,
        )
    }

    pub fn set_block_ack(to_address: u8, from_address: u8, frame_number: u8, address: &[u8]) -> Self {
        Self::set_block(
            to_address,
            from_address,
            SetBlockFrameType::Ack,
            false,
            frame_number,
            address,
        )
    }

    pub fn set_block_nack(to_address: u8, from_address: u8) -> Self {
        Self::set_block(to_address, from_address, SetBlockFrameType::Nack, false, 0, &[])
    }

    pub fn set_block_transfer(to_address: u8, from_address: u8, sequence: u8, data: &[u8]) -> Self {
        Self::set_block(
            to_address,
            from_address,
            SetBlockFrameType::Transfer,
            false,
            sequence,
            data,
        )
    }

    pub fn set_block_abort(to_address: u8, from_address: u8) -> Self {
        Self::set_block(to_address, from_address, SetBlockFrameType::Abort, false, 0, &[])
    }

    pub fn set_block_status(to_address: u8, from_address: u8) -> Self {
        Self::set_block(to_address, from_address, SetBlockFrameType::Status, false, 0, &[])
    }

    pub fn set_block_report(to_address: u8, from_address: u8, done: bool, bitmap: &[u8]) -> Self {
        Self::set_block(to_address, from_address, SetBlockFrameType::Report, done, 0, bitmap)
    }

    /// 构造块读取帧
    pub fn get_block(
        to_address: u8,
        from_address: u8,
        frame_type: GetBlockFrameType,
        sequence: u8,
        data: &[u8],
    ) -> Self {
        let command = (u16::from(frame_type as u8) << BLOCK_FRAME_TYPE_SHIFT)
            | (u16::from(sequence) & BLOCK_SEQ_MASK);
        Self::new_raw(to_address, TransferType::GetBlock, from_address, command, data)
    }

    /// 块读取请求。`block_count` 为块数减一。
    pub fn get_block_request(
        to_address: u8,
        from_address: u8,
        block_count: u8,
        address: &[u8],
    ) -> Self {
        Self::get_block(to_address, from_address, GetBlockFrameType::Request, block_count, address)
    }

    pub fn get_block_ack(to_address: u8, from_address: u8, frame_number: u8, address: &[u8]) -> Self {
        Self::get_block(to_address, from_address, GetBlockFrameType::Ack, frame_number, address)
    }

    pub fn get_block_nack(to_address: u8, from_address: u8) -> Self {
        Self::get_block(to_address, from_address, GetBlockFrameType::Nack, 0, &[])
    }

    /// 块读取 START 帧，携带待取块的位图。
    pub fn get_block_start(to_address: u8, from_address: u8, bitmap: &[u8]) -> Self {
        Self::get_block(to_address, from_address, GetBlockFrameType::Start, 0, bitmap)
    }

    pub fn get_block_transfer(to_address: u8, from_address: u8, sequence: u8, data: &[u8]) -> Self {
        Self::get_block(to_address, from_address, GetBlockFrameType::Transfer, sequence, data)
    }

    pub fn get_block_abort(to_address: u8, from_address: u8) -> Self {
        Self::get_block(to_address, from_address, GetBlockFrameType::Abort, 0, &[])
    }

    /// 构造主动遥测帧（低字节为通道号）
    pub fn unsolicited(to_address: u8, from_address: u8, channel: u8, data: &[u8]) -> Self {
        Self::new_raw(
            to_address,
            TransferType::Unsolicited,
            from_address,
            u16::from(channel),
            data,
        )
    }

    /// 构造时间同步广播帧（command = 0）
    pub fn time_sync(from_address: u8, data: &[u8]) -> Self {
        Self::new_raw(ADDRESS_TIME_SYNC, TransferType::TimeSync, from_address, 0, data)
    }

    // ------------------------------------------------------------------
    // 命令字段解析
    // ------------------------------------------------------------------

    /// 遥控/遥测帧类型（bits 9:8）。值 3 未定义。
    pub fn tc_frame_type(&self) -> Option<TelecommandFrameType> {
        match (self.command >> TC_FRAME_TYPE_SHIFT) & 0x03 {
            0 => Some(TelecommandFrameType::Request),
            1 => Some(TelecommandFrameType::Ack),
            2 => Some(TelecommandFrameType::Nack),
            _ => None,
        }
    }

    /// 块写入帧类型（bits 9:7）。值 5 未定义。
    pub fn sb_frame_type(&self) -> Option<SetBlockFrameType> {
        match (self.command >> BLOCK_FRAME_TYPE_SHIFT) & 0x07 {
            0 => Some(SetBlockFrameType::Request),
            1 => Some(SetBlockFrameType::Transfer),
            2 => Some(SetBlockFrameType::Ack),
            3 => Some(SetBlockFrameType::Abort),
            4 => Some(SetBlockFrameType::Nack),
            6 => Some(SetBlockFrameType::Status),
            7 => Some(SetBlockFrameType::Report),
            _ => None,
        }
    }

    /// 块读取帧类型（bits 9:7）。值 1、5 未定义。
    pub fn gb_frame_type(&self) -> Option<GetBlockFrameType> {
        match (self.command >> BLOCK_FRAME_TYPE_SHIFT) & 0x07 {
            0 => Some(GetBlockFrameType::Request),
            2 => Some(GetBlockFrameType::Ack),
            3 => Some(GetBlockFrameType::Abort),
            4 => Some(GetBlockFrameType::Nack),
            6 => Some(GetBlockFrameType::Start),
            7 => Some(GetBlockFrameType::Transfer),
            _ => None,
        }
    }

    /// 通道号（TC/TM/UN 帧的 command 低字节）
    pub fn channel(&self) -> u8 {
        self.command as u8
    }

    /// 块序号 / 命令低 6 位（SB/GB 帧）
    pub fn block_cmd_bits(&self) -> u8 {
        (self.command & BLOCK_SEQ_MASK) as u8
    }

    /// REPORT 帧 done 位（bit 6）
    pub fn done_bit(&self) -> bool {
        self.command & BLOCK_DONE_BIT != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telecommand_request_layout() {
        let frame = CanTsFrame::telecommand_request(0x20, 0x10, 0x05, &[0xAA]);
        assert_eq!(frame.command, 0x005);
        assert_eq!(frame.channel(), 0x05);
        assert_eq!(frame.tc_frame_type(), Some(TelecommandFrameType::Request));

        let ack = CanTsFrame::telecommand_ack(0x10, 0x20, 0x05);
        assert_eq!(ack.command, (1 << 8) | 0x05);
        assert_eq!(ack.tc_frame_type(), Some(TelecommandFrameType::Ack));

        let nack = CanTsFrame::telecommand_nack(0x10, 0x20, 0xFF);
        assert_eq!(nack.command, (2 << 8) | 0xFF);
        assert_eq!(nack.tc_frame_type(), Some(TelecommandFrameType::Nack));
    }

    #[test]
    fn test_tc_frame_type_undefined() {
        let frame = CanTsFrame::new_raw(0x20, TransferType::Telecommand, 0x10, 3 << 8, &[]);
        assert_eq!(frame.tc_frame_type(), None);
    }

    #[test]
    fn test_set_block_layout() {
        // REQUEST：frame_number = 块数 - 1
        let req = CanTsFrame::set_block_request(0x20, 0x10, 1, &[0x34, 0x12]);
        assert_eq!(req.command, 0x001);
        assert_eq!(req.sb_frame_type(), Some(SetBlockFrameType::Request));
        assert_eq!(req.block_cmd_bits(), 1);
        assert_eq!(req.data(), &[0x34, 0x12]);

        let transfer = CanTsFrame::set_block_transfer(0x20, 0x10, 0x3F, &[0; 8]);
        assert_eq!(transfer.command, (1 << 7) | 0x3F);

        let status = CanTsFrame::set_block_status(0x20, 0x10);
        assert_eq!(status.command, 6 << 7);

        let report = CanTsFrame::set_block_report(0x10, 0x20, true, &[0x03]);
        assert_eq!(report.command, (7 << 7) | (1 << 6));
        assert!(report.done_bit());
        assert_eq!(report.sb_frame_type(), Some(SetBlockFrameType::Report));

        let abort = CanTsFrame::set_block_abort(0x20, 0x10);
        assert_eq!(abort.command, 3 << 7);
        assert!(!abort.done_bit());
    }

    #[test]
    fn test_get_block_layout() {
        let req = CanTsFrame::get_block_request(0x20, 0x10, 1, &[0x05]);
        assert_eq!(req.command, 0x001);
        assert_eq!(req.gb_frame_type(), Some(GetBlockFrameType::Request));

        let start = CanTsFrame::get_block_start(0x20, 0x10, &[0x03]);
        assert_eq!(start.command, 6 << 7);
        assert_eq!(start.data(), &[0x03]);

        let transfer = CanTsFrame::get_block_transfer(0x10, 0x20, 1, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(transfer.command, (7 << 7) | 1);
        assert_eq!(transfer.block_cmd_bits(), 1);
    }

    #[test]
    fn test_gb_frame_type_undefined() {
        let frame = CanTsFrame::new_raw(0x20, TransferType::GetBlock, 0x10, 1 << 7, &[]);
        assert_eq!(frame.gb_frame_type(), None);
        let frame = CanTsFrame::new_raw(0x20, TransferType::GetBlock, 0x10, 5 << 7, &[]);
        assert_eq!(frame.gb_frame_type(), None);
    }

    #[test]
    fn test_unsolicited_layout() {
        let frame = CanTsFrame::unsolicited(0x01, 0x20, 0x07, &[]);
        assert_eq!(frame.command, 0x007);
        assert_eq!(frame.channel(), 0x07);
        assert_eq!(frame.transfer_type, TransferType::Unsolicited);
    }

    #[test]
    fn test_time_sync_layout() {
        let frame = CanTsFrame::time_sync(0x10, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(frame.to_address, ADDRESS_TIME_SYNC);
        assert_eq!(frame.command, 0);
        assert_eq!(frame.transfer_type, TransferType::TimeSync);
    }

    #[test]
    fn test_sequence_masked_to_6_bits() {
        let frame = CanTsFrame::set_block_transfer(0x20, 0x10, 0xFF, &[]);
        assert_eq!(frame.block_cmd_bits(), 0x3F);
    }
}
