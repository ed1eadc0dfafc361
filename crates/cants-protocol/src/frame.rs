//! CAN-TS 帧定义与 29 位标识符编解码
//!
//! 逻辑帧（[`CanTsFrame`]）与物理帧（[`CanFrame`]）之间的转换是纯函数，
//! 不持有任何状态。标识符布局（LSB 起）：
//!
//! ```text
//! bits  0..=9  : command（10 位）
//! bits 10..=17 : from_address
//! bits 18..=20 : transfer_type
//! bits 21..=28 : to_address
//! ```

use crate::ProtocolError;

/// 时间同步广播地址。
pub const ADDRESS_TIME_SYNC: u8 = 0x00;
/// 保活广播地址。
pub const ADDRESS_KEEP_ALIVE: u8 = 0x01;

/// 29 位扩展标识符掩码
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
/// 命令字段掩码（10 位）
pub const COMMAND_MASK: u16 = 0x03FF;

const FROM_ADDRESS_SHIFT: u32 = 10;
const TRANSFER_TYPE_SHIFT: u32 = 18;
const TO_ADDRESS_SHIFT: u32 = 21;

/// 物理 CAN 2.0 帧（仅支持 CAN 2.0，不支持 CAN FD）
///
/// 设计要点：
/// - Copy trait：零成本复制，适合高频场景
/// - 固定 8 字节数据：避免堆分配
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanFrame {
    /// CAN ID（标准帧 11 位或扩展帧 29 位）
    pub id: u32,
    /// 是否为扩展帧（29-bit ID）
    pub extended: bool,
    /// 是否为远程帧（RTR）
    pub rtr: bool,
    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],
    /// 有效数据长度 (0-8)
    pub len: u8,
}

impl CanFrame {
    /// 创建扩展帧（CAN-TS 帧始终为扩展帧、非 RTR）
    pub fn new_extended(id: u32, data: &[u8]) -> Self {
        let mut fixed = [0u8; 8];
        let len = data.len().min(8);
        fixed[..len].copy_from_slice(&data[..len]);
        Self {
            id: id & CAN_EFF_MASK,
            extended: true,
            rtr: false,
            data: fixed,
            len: len as u8,
        }
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// CAN-TS 传输类型（标识符 bits 18..=20）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum TransferType {
    /// 时间同步广播
    TimeSync = 0,
    /// 主动遥测（也承载保活帧）
    Unsolicited = 1,
    /// 遥控指令
    Telecommand = 2,
    /// 遥测
    Telemetry = 3,
    /// 块写入（push）
    SetBlock = 4,
    /// 块读取（pull）
    GetBlock = 5,
}

impl TryFrom<u8> for TransferType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::TimeSync),
            1 => Ok(Self::Unsolicited),
            2 => Ok(Self::Telecommand),
            3 => Ok(Self::Telemetry),
            4 => Ok(Self::SetBlock),
            5 => Ok(Self::GetBlock),
            other => Err(ProtocolError::InvalidTransferType(other)),
        }
    }
}

/// 逻辑 CAN-TS 帧
///
/// 字段集合为 (to, type, from, command, data)。`command` 的子字段布局
/// 取决于 `transfer_type`，见 [`crate::command`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanTsFrame {
    /// 目的节点地址
    pub to_address: u8,
    /// 传输类型
    pub transfer_type: TransferType,
    /// 源节点地址
    pub from_address: u8,
    /// 10 位命令字段
    pub command: u16,
    data: [u8; 8],
    len: u8,
}

impl CanTsFrame {
    /// 由原始参数创建帧。`command` 高于 10 位的部分被丢弃。
    pub fn new_raw(
        to_address: u8,
        transfer_type: TransferType,
        from_address: u8,
        command: u16,
        data: &[u8],
    ) -> Self {
        let mut fixed = [0u8; 8];
        let len = data.len().min(8);
        fixed[..len].copy_from_slice(&data[..len]);
        Self {
            to_address,
            transfer_type,
            from_address,
            command: command & COMMAND_MASK,
            data: fixed,
            len: len as u8,
        }
    }

    /// 获取数据切片
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// 数据长度
    pub fn data_len(&self) -> usize {
        self.len as usize
    }

    /// 判断 `address` 是否为广播地址（时间同步或保活）。
    /// 广播地址不能作为点对点传输的目的地址。
    pub fn is_broadcast_address(address: u8) -> bool {
        address == ADDRESS_TIME_SYNC || address == ADDRESS_KEEP_ALIVE
    }

    /// 编码为物理 CAN 帧（始终为扩展帧、非 RTR）
    pub fn to_can_frame(&self) -> CanFrame {
        let id = u32::from(self.command & COMMAND_MASK)
            | (u32::from(self.from_address) << FROM_ADDRESS_SHIFT)
            | ((self.transfer_type as u32) << TRANSFER_TYPE_SHIFT)
            | (u32::from(self.to_address) << TO_ADDRESS_SHIFT);
        CanFrame::new_extended(id, self.data())
    }

    /// 从物理 CAN 帧解码
    ///
    /// # 错误
    /// - `ProtocolError::BasicFrame`: 11 位标识符帧
    /// - `ProtocolError::RtrFrame`: 远程帧
    /// - `ProtocolError::InvalidTransferType`: 传输类型字段超出协议定义
    pub fn from_can_frame(frame: &CanFrame) -> Result<Self, ProtocolError> {
        if !frame.extended {
            return Err(ProtocolError::BasicFrame);
        }
        if frame.rtr {
            return Err(ProtocolError::RtrFrame);
        }

        let transfer_type =
            TransferType::try_from(((frame.id >> TRANSFER_TYPE_SHIFT) & 0x07) as u8)?;

        Ok(Self::new_raw(
            ((frame.id >> TO_ADDRESS_SHIFT) & 0xFF) as u8,
            transfer_type,
            ((frame.id >> FROM_ADDRESS_SHIFT) & 0xFF) as u8,
            (frame.id & u32::from(COMMAND_MASK)) as u16,
            frame.data_slice(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_packing_layout() {
        let frame = CanTsFrame::new_raw(0x20, TransferType::Telecommand, 0x10, 0x005, &[0x01]);
        let can = frame.to_can_frame();
        // 0x20<<21 | 2<<18 | 0x10<<10 | 0x005
        assert_eq!(can.id, (0x20 << 21) | (2 << 18) | (0x10 << 10) | 0x005);
        assert!(can.extended);
        assert!(!can.rtr);
        assert_eq!(can.data_slice(), &[0x01]);
    }

    #[test]
    fn test_id_roundtrip() {
        // 对字段域做抽样遍历，覆盖所有边界值
        for &to in &[0x00u8, 0x01, 0x10, 0x7F, 0xFF] {
            for ty in [
                TransferType::TimeSync,
                TransferType::Unsolicited,
                TransferType::Telecommand,
                TransferType::Telemetry,
                TransferType::SetBlock,
                TransferType::GetBlock,
            ] {
                for &from in &[0x00u8, 0x10, 0xFF] {
                    for &cmd in &[0x000u16, 0x001, 0x155, 0x3FF] {
                        let frame = CanTsFrame::new_raw(to, ty, from, cmd, &[1, 2, 3]);
                        let decoded = CanTsFrame::from_can_frame(&frame.to_can_frame()).unwrap();
                        assert_eq!(decoded, frame);
                    }
                }
            }
        }
    }

    #[test]
    fn test_command_masked_to_10_bits() {
        let frame = CanTsFrame::new_raw(0x20, TransferType::Telemetry, 0x10, 0xFFFF, &[]);
        assert_eq!(frame.command, 0x3FF);
    }

    #[test]
    fn test_decode_rejects_basic_frame() {
        let can = CanFrame {
            id: 0x123,
            extended: false,
            rtr: false,
            data: [0; 8],
            len: 0,
        };
        assert_eq!(
            CanTsFrame::from_can_frame(&can),
            Err(ProtocolError::BasicFrame)
        );
    }

    #[test]
    fn test_decode_rejects_rtr_frame() {
        let mut can = CanTsFrame::new_raw(0x20, TransferType::Telecommand, 0x10, 0, &[])
            .to_can_frame();
        can.rtr = true;
        assert_eq!(CanTsFrame::from_can_frame(&can), Err(ProtocolError::RtrFrame));
    }

    #[test]
    fn test_decode_rejects_invalid_transfer_type() {
        // transfer_type = 7 未定义
        let can = CanFrame::new_extended(7 << 18, &[]);
        assert_eq!(
            CanTsFrame::from_can_frame(&can),
            Err(ProtocolError::InvalidTransferType(7))
        );
    }

    #[test]
    fn test_broadcast_address() {
        assert!(CanTsFrame::is_broadcast_address(0x00));
        assert!(CanTsFrame::is_broadcast_address(0x01));
        assert!(!CanTsFrame::is_broadcast_address(0x02));
        assert!(!CanTsFrame::is_broadcast_address(0xFF));
    }

    #[test]
    fn test_data_truncated_to_8_bytes() {
        let frame = CanTsFrame::new_raw(
            0x20,
            TransferType::SetBlock,
            0x10,
            0,
            &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
        );
        assert_eq!(frame.data_len(), 8);
        assert_eq!(frame.data(), &[0, 1, 2, 3, 4, 5, 6, 7]);
    }
}
