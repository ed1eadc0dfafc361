//! 在飞传输的状态存储
//!
//! 四类传输分别登记在独立的注册表中。唯一性不变式：
//! 每个 (远端地址, 通道) 至多一个 TC 传输、一个 TM 传输；
//! 每个远端地址至多一个 SB 传输、一个 GB 传输。

use crate::timer::TimerId;
use smallvec::SmallVec;
use std::time::Duration;

/// 裁剪后的 little-endian 起始地址（1..=8 字节，栈上分配）
pub(crate) type StartAddress = SmallVec<[u8; 8]>;

/// 请求/应答型传输（TC/TM）的发送状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestTxState {
    Idle,
    SendingRequest,
}

/// 请求/应答型传输（TC/TM）的接收状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestRxState {
    Idle,
    WaitingForRequestAck,
}

/// 遥控传输状态
#[derive(Debug)]
pub(crate) struct TelecommandTransfer {
    pub address: u8,
    pub channel: u8,
    /// 待发送的数据负载
    pub data: Vec<u8>,
    pub retry_count: u8,
    pub max_retries: u8,
    pub tx_state: RequestTxState,
    pub rx_state: RequestRxState,
    pub watchdog: Option<TimerId>,
}

/// 遥测传输状态
#[derive(Debug)]
pub(crate) struct TelemetryTransfer {
    pub address: u8,
    pub channel: u8,
    pub retry_count: u8,
    pub max_retries: u8,
    pub tx_state: RequestTxState,
    pub rx_state: RequestRxState,
    pub watchdog: Option<TimerId>,
}

/// 块传输的发送状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockTxState {
    Idle,
    SendingRequest,
    SendingStart,
    SendingData,
    /// 数据发送完毕与状态请求之间的延迟窗口
    WaitingForSendStatusRequest,
    SendingStatusRequest,
    SendingAbort,
}

/// 块传输的接收状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockRxState {
    Idle,
    WaitingForRequestAck,
    WaitingForData,
    WaitingForAbortAck,
}

/// 块写入（set block）传输状态
#[derive(Debug)]
pub(crate) struct SetBlockTransfer {
    pub address: u8,
    pub start: StartAddress,
    pub data: Vec<u8>,
    /// 已发送（经报告确认）数据帧的位图，每 8 字节帧 1 位
    pub bitmap: Vec<u8>,
    pub blocks: u8,
    /// 来自报告帧的 done 位
    pub done: bool,
    pub retry_count: u8,
    pub max_retries: u8,
    pub report_retry_count: u8,
    pub max_report_retries: u8,
    pub report_delay: Duration,
    pub tx_state: BlockTxState,
    pub rx_state: BlockRxState,
    pub watchdog: Option<TimerId>,
    pub report_delay_timer: Option<TimerId>,
}

impl SetBlockTransfer {
    /// 序号 `sequence` 对应的数据分片（最后一片可短于 8 字节）
    pub(crate) fn chunk(&self, sequence: u8) -> &[u8] {
        let begin = usize::from(sequence) * 8;
        let end = self.data.len().min(begin + 8);
        &self.data[begin..end]
    }
}

/// 块读取（get block）传输状态
#[derive(Debug)]
pub(crate) struct GetBlockTransfer {
    pub address: u8,
    pub start: StartAddress,
    /// 接收缓冲区，固定 `blocks * 8` 字节
    pub data: Vec<u8>,
    /// 待接收数据帧的位图（置位 = 尚未收到）
    pub bitmap: Vec<u8>,
    pub blocks: u8,
    pub retry_count: u8,
    pub max_retries: u8,
    pub start_retry_count: u8,
    pub max_start_retries: u8,
    pub tx_state: BlockTxState,
    pub rx_state: BlockRxState,
    pub watchdog: Option<TimerId>,
}
