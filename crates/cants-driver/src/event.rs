//! 引擎事件定义
//!
//! 所有终止事件与被动观察事件统一为和类型，通过无界
//! `crossbeam-channel` 交付。对单个传输而言，事件顺序与引擎
//! 的串行调度顺序一致。

use crate::error::{ReceiveBlockError, ReceiveTmError, SendBlockError, SendTcError};

/// CAN-TS 引擎发射的事件
///
/// 每个成功创建的传输在其生命周期内恰好发射一个终止事件
/// （`…Completed` 或 `…Failed`）；被 `stop` 或 `bus_switch` 放弃的
/// 传输不发射任何事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanTsEvent {
    /// 遥控发送完成
    SendTcCompleted { address: u8, channel: u8 },
    /// 遥控发送失败
    SendTcFailed {
        address: u8,
        channel: u8,
        error: SendTcError,
    },

    /// 遥测接收完成
    ReceiveTmCompleted {
        address: u8,
        channel: u8,
        data: Vec<u8>,
    },
    /// 遥测接收失败
    ReceiveTmFailed {
        address: u8,
        channel: u8,
        error: ReceiveTmError,
    },

    /// 数据块发送完成
    SendBlockCompleted { address: u8 },
    /// 数据块发送失败
    SendBlockFailed { address: u8, error: SendBlockError },

    /// 数据块接收完成
    ReceiveBlockCompleted { address: u8, data: Vec<u8> },
    /// 数据块接收失败
    ReceiveBlockFailed {
        address: u8,
        error: ReceiveBlockError,
    },

    /// 时间同步广播发送完成
    SendTimeSyncCompleted,
    /// 时间同步广播发送失败
    SendTimeSyncFailed,

    /// 主动遥测发送完成
    SendUnsolicitedCompleted { address: u8, channel: u8 },
    /// 主动遥测发送失败
    SendUnsolicitedFailed { address: u8, channel: u8 },

    /// 收到主动遥测
    UnsolicitedReceived {
        address: u8,
        channel: u8,
        data: Vec<u8>,
    },

    /// 收到时间同步广播（携带原始时间字节）
    TimeSyncReceived { address: u8, time: Vec<u8> },

    /// 在活动总线上收到保活帧
    KeepAliveReceivedNominal {
        address: u8,
        channel: u8,
        data: Vec<u8>,
    },
    /// 在冗余总线上收到保活帧
    KeepAliveReceivedRedundant {
        address: u8,
        channel: u8,
        data: Vec<u8>,
    },
}
