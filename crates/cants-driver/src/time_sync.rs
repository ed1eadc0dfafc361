//! 时间同步广播
//!
//! 即发即弃：没有传输状态，链路交付确认直接映射为终止事件。
//! 时间值以 8 字节 little-endian 编码，不做裁剪。

use crate::engine::Engine;
use crate::error::DriverError;
use crate::event::CanTsEvent;
use cants_can::SendErrorReason;
use cants_protocol::CanTsFrame;
use tracing::{debug, error};

impl Engine {
    /// 广播一条时间同步帧。
    pub(crate) fn send_time_sync(&mut self, time: u64) -> Result<(), DriverError> {
        if !self.running {
            return Err(DriverError::NotRunning);
        }

        let data = time.to_le_bytes();
        let frame = CanTsFrame::time_sync(self.address, &data);

        if !self.send_frame(&frame) {
            error!("Time sync send frame failed");
            self.emit(CanTsEvent::SendTimeSyncFailed);
            return Err(DriverError::SendRefused);
        }

        debug!("Sending time sync frame with time = {}", time);
        Ok(())
    }

    pub(crate) fn ts_frame_sent(&mut self) {
        debug!("Time sync sent");
        self.emit(CanTsEvent::SendTimeSyncCompleted);
    }

    pub(crate) fn ts_send_error(&mut self, reason: SendErrorReason) {
        error!("Failed sending time sync reason = {:?}", reason);
        self.emit(CanTsEvent::SendTimeSyncFailed);
    }

    /// 收到时间同步广播（仅活动总线）。
    pub(crate) fn ts_frame_received(&mut self, frame: &CanTsFrame) {
        debug!(
            "Received time sync from address = {:#04x} time = {:?}",
            frame.from_address,
            frame.data()
        );
        self.emit(CanTsEvent::TimeSyncReceived {
            address: frame.from_address,
            time: frame.data().to_vec(),
        });
    }
}
