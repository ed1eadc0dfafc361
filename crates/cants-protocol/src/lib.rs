//! # CAN-TS Protocol
//!
//! CAN-TS 应用层协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `frame`: 逻辑帧与物理帧之间的编解码（29 位扩展标识符布局）
//! - `command`: 各传输类型的 10 位命令字段构造与解析
//! - `bitmap`: 块传输选择性重传所用的位图工具
//!
//! ## 字节序
//!
//! 数据负载内的多字节数值（块传输起始地址、时间同步时间值）
//! 使用 little-endian 低位在前。

pub mod bitmap;
pub mod command;
pub mod frame;

pub use command::{GetBlockFrameType, SetBlockFrameType, TelecommandFrameType, TelemetryFrameType};
pub use frame::{ADDRESS_KEEP_ALIVE, ADDRESS_TIME_SYNC, CanFrame, CanTsFrame, TransferType};

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Basic 11-bit identifier frames are not supported")]
    BasicFrame,

    #[error("RTR frames are not supported")]
    RtrFrame,

    #[error("Invalid transfer type: {0}")]
    InvalidTransferType(u8),

    #[error("Invalid frame data length: {0}")]
    InvalidLength(usize),
}

/// 将整数值转换为 little-endian 字节向量。
///
/// `trim` 为 true 时去除高位（尾部）的零字节，但至少保留 1 字节。
/// 块传输 REQUEST/ACK 帧中的起始地址采用该裁剪格式。
pub fn to_le_bytes_trimmed(value: u64, trim: bool) -> Vec<u8> {
    let mut bytes = value.to_le_bytes().to_vec();
    while trim && bytes.len() > 1 && bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}
