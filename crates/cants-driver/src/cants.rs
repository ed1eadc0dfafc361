//! CAN-TS 公共 API
//!
//! 对外的 [`CanTs`] 句柄，封装后台调度线程与引擎上下文。

use crate::builder::CanTsBuilder;
use crate::dispatch::CanBus;
use crate::engine::Engine;
use crate::error::DriverError;
use crate::event::CanTsEvent;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// CAN-TS 发起方协议栈（对外 API）
///
/// 经 [`CanTsBuilder`] 构建。所有操作方法在当前线程完成入口校验与
/// 初始发送，随后的协议推进由后台调度线程驱动；终止结果以
/// [`CanTsEvent`] 经 [`CanTs::events`] 通道交付。
///
/// # Example
///
/// ```no_run
/// use cants_driver::{CanTs, CanTsEvent};
/// use cants_can::{LinkSettings, LoopbackLink};
///
/// let (nominal, _) = LoopbackLink::new();
/// let (redundant, _) = LoopbackLink::new();
///
/// let stack = CanTs::builder()
///     .address(0x10)
///     .timeout(std::time::Duration::from_millis(100))
///     .settings(LinkSettings::SerialBridge {
///         port_name_nominal: "/dev/ttyUSB0".to_string(),
///         port_name_redundant: "/dev/ttyUSB1".to_string(),
///         baud: 921_600,
///     })
///     .links(nominal, redundant)
///     .build()
///     .unwrap();
///
/// let events = stack.events();
/// stack.send_tc(0x20, 0, &[0x01], 0).unwrap();
/// match events.recv().unwrap() {
///     CanTsEvent::SendTcCompleted { address, channel } => {
///         println!("TC delivered to {:#04x}/{}", address, channel);
///     },
///     other => println!("{:?}", other),
/// }
/// ```
pub struct CanTs {
    ctx: Arc<Mutex<Engine>>,
    events: Receiver<CanTsEvent>,
    running: Arc<AtomicBool>,
    dispatch_thread: Option<JoinHandle<()>>,
}

impl CanTs {
    /// 遥控请求的默认重试次数
    pub const DEFAULT_TC_RETRY_COUNT: u8 = 0;
    /// 其余请求的默认重试次数
    pub const DEFAULT_RETRY_COUNT: u8 = 3;
    /// 数据发送结束与状态请求之间的默认延迟
    pub const DEFAULT_REPORT_DELAY: Duration = Duration::from_millis(20);
    /// 默认报告重试轮次
    pub const DEFAULT_REPORT_RETRY_COUNT: u8 = 3;
    /// START 帧默认重试次数
    pub const DEFAULT_START_RETRY_COUNT: u8 = 3;

    /// 创建 Builder。
    pub fn builder() -> CanTsBuilder {
        CanTsBuilder::new()
    }

    pub(crate) fn from_parts(
        ctx: Arc<Mutex<Engine>>,
        events: Receiver<CanTsEvent>,
        running: Arc<AtomicBool>,
        dispatch_thread: JoinHandle<()>,
    ) -> Self {
        Self {
            ctx,
            events,
            running,
            dispatch_thread: Some(dispatch_thread),
        }
    }

    /// 事件接收端。可多次调用，各接收端竞争消费。
    pub fn events(&self) -> Receiver<CanTsEvent> {
        self.events.clone()
    }

    /// 发起遥控传输。
    ///
    /// # 错误
    /// - 入口校验失败（广播地址 / 重复传输 / 数据超长）同步返回，不发射事件
    /// - 链路拒绝初始帧：发射 `SendTcFailed(SendRequestFailed)` 并返回
    ///   [`DriverError::SendRefused`]
    pub fn send_tc(
        &self,
        address: u8,
        channel: u8,
        data: &[u8],
        retry_count: u8,
    ) -> Result<(), DriverError> {
        self.ctx.lock().send_tc(address, channel, data, retry_count)
    }

    /// 发起遥测接收。终止事件为 `ReceiveTmCompleted`（携带数据）或
    /// `ReceiveTmFailed`。
    pub fn receive_tm(
        &self,
        address: u8,
        channel: u8,
        retry_count: u8,
    ) -> Result<(), DriverError> {
        self.ctx.lock().receive_tm(address, channel, retry_count)
    }

    /// 发起块写入传输（1..=512 字节，按 8 字节帧推送，位图驱动
    /// 选择性重传）。
    pub fn send_block(
        &self,
        address: u8,
        start_address: u64,
        data: &[u8],
        retry_count: u8,
        report_delay: Duration,
        report_retry_count: u8,
    ) -> Result<(), DriverError> {
        self.ctx.lock().send_block(
            address,
            start_address,
            data,
            retry_count,
            report_delay,
            report_retry_count,
        )
    }

    /// 发起块读取传输（`length` 为 8 字节帧数量，1..=64）。
    pub fn receive_block(
        &self,
        address: u8,
        start_address: u64,
        length: u8,
        retry_count: u8,
        start_retry_count: u8,
    ) -> Result<(), DriverError> {
        self.ctx.lock().receive_block(
            address,
            start_address,
            length,
            retry_count,
            start_retry_count,
        )
    }

    /// 广播时间同步帧（即发即弃）。
    pub fn send_time_sync(&self, time: u64) -> Result<(), DriverError> {
        self.ctx.lock().send_time_sync(time)
    }

    /// 发送主动遥测帧（即发即弃）。
    pub fn send_unsolicited(
        &self,
        address: u8,
        channel: u8,
        data: &[u8],
    ) -> Result<(), DriverError> {
        self.ctx.lock().send_unsolicited(address, channel, data)
    }

    /// 当前活动总线。
    pub fn active_bus(&self) -> CanBus {
        self.ctx.lock().active_bus
    }

    /// 在标称与冗余总线之间切换。在飞传输被静默放弃。
    pub fn bus_switch(&self) {
        self.ctx.lock().bus_switch();
    }

    /// 本地节点地址。
    pub fn address(&self) -> u8 {
        self.ctx.lock().local_address()
    }

    /// 停止协议栈：清空注册表、关闭两条链路并回收调度线程。
    /// 幂等；`Drop` 时自动调用。
    pub fn stop(&mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.dispatch_thread.take() else {
            return;
        };

        self.running.store(false, Ordering::Release);
        self.ctx.lock().stop();
        let _ = handle.join();
    }
}

impl Drop for CanTs {
    fn drop(&mut self) {
        self.shutdown();
    }
}
