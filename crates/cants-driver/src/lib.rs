//! # CAN-TS Driver
//!
//! CAN-TS 发起方协议引擎。
//!
//! ## 架构
//!
//! - [`CanTs`] / [`CanTsBuilder`]: 对外 API 与构建器
//! - 双总线调度：出站帧经活动总线发送，两条总线的入站帧分别分类
//!   （冗余总线只贡献保活观察）
//! - 四个发起方状态机：遥控（TC）、遥测（TM）、块写入（SB）、
//!   块读取（GB），每个在飞传输拥有自己的看门狗定时器
//! - 事件而非回调：终止结果与被动观察统一为 [`CanTsEvent`]，经
//!   `crossbeam-channel` 交付
//!
//! ## 调度模型
//!
//! 单线程合作式：后台调度线程持有引擎上下文锁，链路通知、定时器
//! 到期与用户 API 调用都串行运行到完成，处理器内部没有阻塞点。

mod builder;
mod cants;
mod dispatch;
mod engine;
mod error;
mod event;
mod gb;
mod pipeline;
mod sb;
mod tc;
mod time_sync;
mod timer;
mod tm;
mod transfer;
mod unsolicited;

#[cfg(test)]
mod testkit;

pub use builder::CanTsBuilder;
pub use cants::CanTs;
pub use dispatch::CanBus;
pub use error::{
    DriverError, ReceiveBlockError, ReceiveTmError, SendBlockError, SendTcError,
};
pub use event::CanTsEvent;
