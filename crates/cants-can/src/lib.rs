//! # CAN-TS Link Adapter Layer
//!
//! CAN 链路硬件抽象层，提供统一的链路驱动接口。
//!
//! 驱动（串口 CAN 桥等）在自己的 I/O 线程中工作，通过
//! `crossbeam-channel` 将异步通知（发送完成 / 发送失败 / 收到帧）
//! 投递给上层。`send` 返回 `Ok` 仅表示帧被驱动接收，实际上线结果
//! 之后恰好由一条 [`LinkEvent::FrameSent`] 或 [`LinkEvent::SendError`]
//! 通知决定。

use crossbeam_channel::Receiver;
use thiserror::Error;

// 重新导出 cants-protocol 中的物理帧类型
pub use cants_protocol::CanFrame;

pub mod loopback;

pub use loopback::{LoopbackHandle, LoopbackLink};

/// 链路层统一错误类型
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Port open failed: {0}")]
    OpenFailed(String),

    #[error("Link not open")]
    NotOpen,

    #[error("Device busy")]
    Busy,
}

/// 帧发送失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorReason {
    /// 桥接设备有空间，但串口写入失败
    WriteError,
    /// 桥接设备缓冲区无空间
    DongleBusy,
}

/// 链路驱动的异步通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// 帧已成功发送到 CAN 总线
    FrameSent(CanFrame),
    /// 帧发送失败（重试耗尽）
    SendError(CanFrame, SendErrorReason),
    /// 从 CAN 总线收到帧
    FrameReceived(CanFrame),
}

/// 低层链路协议设置（标签化变体）
///
/// 当前只有串口 CAN 桥被实际使用；其它变体在启动时被干净地拒绝。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSettings {
    /// 串口 CAN 桥（每条总线一个串口）
    SerialBridge {
        /// 总线 0（标称总线）使用的串口
        port_name_nominal: String,
        /// 总线 1（冗余总线）使用的串口
        port_name_redundant: String,
        /// 串口波特率
        baud: u32,
    },
    /// 基于 IP 的接口板
    IpBridge { ip: u32, port: u16 },
}

/// 链路驱动接口（每条物理总线一个实例）
///
/// 实现者负责物理层成帧与内部重传；从上层视角，`send` 成功是一个
/// 延迟承诺，最终由一条 `FrameSent` 或 `SendError` 通知兑现。
pub trait LinkDriver: Send {
    /// 打开串口 `port_name`，波特率 `baud`。
    fn open(&mut self, port_name: &str, baud: u32) -> Result<(), LinkError>;

    /// 关闭链路。
    fn close(&mut self);

    /// 发送一帧。返回 `Err` 表示驱动拒绝接收该帧。
    fn send(&mut self, frame: CanFrame) -> Result<(), LinkError>;

    /// 异步通知接收端。
    fn notifications(&self) -> Receiver<LinkEvent>;

    /// 驱动当前的串口名。
    fn port_name(&self) -> String;
}
