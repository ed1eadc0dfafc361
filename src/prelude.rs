//! Prelude - 常用类型的便捷导入
//!
//! 大多数用户应该使用这个模块来导入常用类型：
//!
//! ```rust
//! use cants_sdk::prelude::*;
//! ```

// 驱动层（推荐使用）
pub use crate::driver::{CanBus, CanTs, CanTsBuilder, CanTsEvent};

// 链路层（常用 Trait 与设置）
pub use crate::can::{LinkDriver, LinkSettings, LoopbackLink};

// 协议层（帧类型）
pub use crate::protocol::{CanFrame, CanTsFrame, TransferType};

// 错误类型
pub use crate::can::LinkError;
pub use crate::driver::{
    DriverError, ReceiveBlockError, ReceiveTmError, SendBlockError, SendTcError,
};
pub use crate::protocol::ProtocolError;
