//! 主动遥测与保活观察
//!
//! 主动遥测为即发即弃；保活帧是目的地址为保活广播地址的主动遥测，
//! 本节点只被动观察（活动总线与冗余总线都观察）。

use crate::engine::Engine;
use crate::error::DriverError;
use crate::event::CanTsEvent;
use cants_can::SendErrorReason;
use cants_protocol::{ADDRESS_TIME_SYNC, CanTsFrame};
use tracing::{debug, error};

impl Engine {
    /// 发送主动遥测帧。保活广播地址是合法目的地址，时间同步地址不是。
    pub(crate) fn send_unsolicited(
        &mut self,
        address: u8,
        channel: u8,
        data: &[u8],
    ) -> Result<(), DriverError> {
        if !self.running {
            return Err(DriverError::NotRunning);
        }

        if address == ADDRESS_TIME_SYNC {
            error!("Invalid (reserved) address = {:#04x}", address);
            return Err(DriverError::InvalidAddress(address));
        }

        if data.len() > 8 {
            error!("Invalid data length = {}", data.len());
            return Err(DriverError::InvalidLength(data.len()));
        }

        let frame = CanTsFrame::unsolicited(address, self.address, channel, data);
        if !self.send_frame(&frame) {
            error!(
                "Sending unsolicited frame failed to address = {:#04x} channel = {}",
                address, channel
            );
            self.emit(CanTsEvent::SendUnsolicitedFailed { address, channel });
            return Err(DriverError::SendRefused);
        }

        debug!(
            "Sending unsolicited frame to address = {:#04x} channel = {}",
            address, channel
        );
        Ok(())
    }

    pub(crate) fn un_frame_sent(&mut self, frame: &CanTsFrame) {
        debug!(
            "Unsolicited frame sent to address = {:#04x} channel = {}",
            frame.to_address,
            frame.channel()
        );
        self.emit(CanTsEvent::SendUnsolicitedCompleted {
            address: frame.to_address,
            channel: frame.channel(),
        });
    }

    pub(crate) fn un_send_error(&mut self, frame: &CanTsFrame, reason: SendErrorReason) {
        error!(
            "Failed sending unsolicited to address = {:#04x} channel = {} reason = {:?}",
            frame.to_address,
            frame.channel(),
            reason
        );
        self.emit(CanTsEvent::SendUnsolicitedFailed {
            address: frame.to_address,
            channel: frame.channel(),
        });
    }

    /// 收到发给本节点的主动遥测。
    pub(crate) fn un_frame_received(&mut self, frame: &CanTsFrame) {
        debug!(
            "Received unsolicited frame from address = {:#04x} channel = {}",
            frame.from_address,
            frame.channel()
        );
        self.emit(CanTsEvent::UnsolicitedReceived {
            address: frame.from_address,
            channel: frame.channel(),
            data: frame.data().to_vec(),
        });
    }

    /// 收到保活帧。`nominal_bus` 指示帧来自活动总线还是冗余总线。
    pub(crate) fn keep_alive_received(&mut self, frame: &CanTsFrame, nominal_bus: bool) {
        debug!(
            "Received keep alive frame from address = {:#04x} channel = {} nominal_bus = {}",
            frame.from_address,
            frame.channel(),
            nominal_bus
        );

        let address = frame.from_address;
        let channel = frame.channel();
        let data = frame.data().to_vec();

        if nominal_bus {
            self.emit(CanTsEvent::KeepAliveReceivedNominal {
                address,
                channel,
                data,
            });
        } else {
            self.emit(CanTsEvent::KeepAliveReceivedRedundant {
                address,
                channel,
                data,
            });
        }
    }
}
