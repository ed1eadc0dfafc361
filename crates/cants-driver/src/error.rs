//! 驱动层错误类型定义
//!
//! 同步调用拒绝使用 [`DriverError`]；异步终止失败通过事件携带
//! 各传输类型自己的错误枚举，这是交付给事件消费者的唯一失败词汇。

use cants_can::LinkError;
use thiserror::Error;

/// 遥控传输错误状态
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTcError {
    /// 遥控请求帧发送失败
    #[error("Failed to send telecommand transfer request frame")]
    SendRequestFailed,

    /// 请求重试次数达到上限
    #[error("Maximum number of request retries reached")]
    MaxRetriesReached,
}

/// 遥测传输错误状态
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveTmError {
    /// 遥测请求帧发送失败
    #[error("Failed to send telemetry transfer request frame")]
    SendRequestFailed,

    /// 请求重试次数达到上限
    #[error("Maximum number of request retries reached")]
    MaxRetriesReached,
}

/// 数据块发送（set block）错误状态
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendBlockError {
    /// 块写入请求帧发送失败
    #[error("Failed to send set block transfer request frame")]
    SendRequestFailed,

    /// 请求重试次数达到上限
    #[error("Maximum number of request retries reached")]
    MaxSendRequestRetriesReached,

    /// 数据帧发送失败
    #[error("Failed to send data frame")]
    SendDataFailed,

    /// 状态请求帧发送失败
    #[error("Failed to send status request frame")]
    SendStatusRequestFailed,

    /// 状态请求重试次数达到上限
    #[error("Maximum number of status request retries reached")]
    MaxSendStatusRetriesReached,

    /// 数据重传与状态请求轮次达到上限
    #[error("Maximum number of data retransmissions and status requests reached")]
    MaxReportRetriesReached,

    /// 中止帧发送失败
    #[error("Failed to send abort frame")]
    SendAbortFailed,

    /// 中止重试次数达到上限
    #[error("Maximum number of abort retries reached")]
    MaxSendAbortRetriesReached,

    /// 等待中止 ACK 时收到 NACK
    #[error("NACK received while waiting for abort ACK")]
    AbortNackReceived,
}

/// 数据块接收（get block）错误状态
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveBlockError {
    /// 块读取请求帧发送失败
    #[error("Failed to send get block transfer request frame")]
    SendRequestFailed,

    /// 请求重试次数达到上限
    #[error("Maximum number of request retries reached")]
    MaxSendRequestRetriesReached,

    /// START 帧发送失败
    #[error("Failed to send start frame")]
    SendStartFailed,

    /// START 重试次数达到上限
    #[error("Maximum number of start retries reached")]
    MaxSendStartRetriesReached,

    /// 中止帧发送失败
    #[error("Failed to send abort frame")]
    SendAbortFailed,

    /// 中止重试次数达到上限
    #[error("Maximum number of abort retries reached")]
    MaxSendAbortRetriesReached,

    /// 等待中止 ACK 时收到 NACK
    #[error("NACK received while waiting for abort ACK")]
    AbortNackReceived,
}

/// 驱动层同步错误类型
///
/// API 入口校验失败同步返回，不发射任何事件；
/// 初始发送被链路拒绝时发射对应的 `…Failed(SendRequestFailed)` 事件并返回
/// [`DriverError::SendRefused`]。
#[derive(Error, Debug)]
pub enum DriverError {
    /// 目的地址为广播地址（或保留地址）
    #[error("Invalid address: {0:#04x}")]
    InvalidAddress(u8),

    /// 同一目的地（与通道）已有进行中的传输
    #[error("Transfer already active")]
    TransferActive,

    /// 数据长度超出协议允许范围
    #[error("Invalid data length: {0}")]
    InvalidLength(usize),

    /// 链路驱动拒绝接收初始帧
    #[error("Link driver refused the frame")]
    SendRefused,

    /// 链路设置变体不受支持
    #[error("Unsupported link settings")]
    UnsupportedSettings,

    /// 构建参数缺失
    #[error("Builder not configured: {0}")]
    NotConfigured(&'static str),

    /// 引擎未运行
    #[error("Engine not running")]
    NotRunning,

    /// 链路层错误
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}
