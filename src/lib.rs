//! CAN-TS SDK - CAN-TS 发起方协议栈 Rust SDK
//!
//! 点对点请求/应答与块传输协议，承载于 29 位扩展标识符 CAN 2.0B
//! 帧之上，经串口 CAN 桥工作在标称 + 冗余双总线链路上。
//!
//! # 架构层次
//!
//! - **协议层** (`protocol`): 帧编解码、命令字段布局、位图工具（纯函数）
//! - **链路层** (`can`): 链路驱动抽象与回环后端
//! - **驱动层** (`driver`): 双总线调度、四个发起方状态机、事件发射

pub use cants_can as can;
pub use cants_driver as driver;
pub use cants_protocol as protocol;

pub mod prelude;

// Re-export 核心类型（简化用户导入）
pub use cants_can::{LinkDriver, LinkError, LinkEvent, LinkSettings};
pub use cants_driver::{CanTs, CanTsBuilder, CanTsEvent, DriverError};
pub use cants_protocol::{CanFrame, CanTsFrame, ProtocolError, TransferType};
