//! Builder 模式实现
//!
//! 提供链式构造 [`CanTs`] 实例的便捷方式。`build()` 校验本地地址、
//! 打开两条链路并启动后台调度线程。

use crate::cants::CanTs;
use crate::engine::Engine;
use crate::error::DriverError;
use crate::pipeline::dispatch_loop;
use cants_can::{LinkDriver, LinkSettings};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

/// CanTs Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use cants_driver::CanTsBuilder;
/// use cants_can::{LinkSettings, LoopbackLink};
///
/// let (nominal, _) = LoopbackLink::new();
/// let (redundant, _) = LoopbackLink::new();
///
/// let stack = CanTsBuilder::new()
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
/// # let _ = stack;
/// ```
pub struct CanTsBuilder {
    /// 本地节点地址（不得为广播地址）
    address: u8,
    /// 响应超时
    timeout: Duration,
    /// 低层链路设置
    settings: Option<LinkSettings>,
    /// 两条总线的链路驱动（标称、冗余）
    links: Option<(Box<dyn LinkDriver>, Box<dyn LinkDriver>)>,
}

impl CanTsBuilder {
    /// 创建新的 Builder。
    pub fn new() -> Self {
        Self {
            address: 0,
            timeout: Duration::from_millis(100),
            settings: None,
            links: None,
        }
    }

    /// 设置本地节点地址（必选；广播地址在 `build()` 时被拒绝）。
    pub fn address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// 设置响应超时（可选，默认 100 ms）。
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 设置低层链路设置（必选）。未知变体在 `build()` 时被干净拒绝。
    pub fn settings(mut self, settings: LinkSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// 注入两条总线的链路驱动（必选；顺序为标称、冗余）。
    pub fn links(
        mut self,
        nominal: impl LinkDriver + 'static,
        redundant: impl LinkDriver + 'static,
    ) -> Self {
        self.links = Some((Box::new(nominal), Box::new(redundant)));
        self
    }

    /// 构建并启动 [`CanTs`] 实例。
    ///
    /// # 错误
    /// - [`DriverError::NotConfigured`]: 缺少链路驱动或链路设置
    /// - [`DriverError::InvalidAddress`]: 本地地址为广播地址
    /// - [`DriverError::UnsupportedSettings`]: 链路设置变体不受支持
    /// - [`DriverError::Link`]: 打开链路失败
    pub fn build(self) -> Result<CanTs, DriverError> {
        let (nominal, redundant) =
            self.links.ok_or(DriverError::NotConfigured("link drivers"))?;
        let settings = self
            .settings
            .ok_or(DriverError::NotConfigured("link settings"))?;

        let nominal_rx = nominal.notifications();
        let redundant_rx = redundant.notifications();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();

        let mut engine = Engine::new([nominal, redundant], event_tx);
        engine.start(self.address, self.timeout, &settings)?;

        let ctx = Arc::new(Mutex::new(engine));
        let running = Arc::new(AtomicBool::new(true));

        let ctx_clone = ctx.clone();
        let running_clone = running.clone();
        let dispatch_thread = thread::spawn(move || {
            dispatch_loop(ctx_clone, nominal_rx, redundant_rx, running_clone);
        });

        Ok(CanTs::from_parts(ctx, event_rx, running, dispatch_thread))
    }
}

impl Default for CanTsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cants_can::LoopbackLink;

    fn serial_settings() -> LinkSettings {
        LinkSettings::SerialBridge {
            port_name_nominal: "loop0".to_string(),
            port_name_redundant: "loop1".to_string(),
            baud: 115_200,
        }
    }

    #[test]
    fn test_build_requires_links() {
        let result = CanTsBuilder::new()
            .address(0x10)
            .settings(serial_settings())
            .build();
        assert!(matches!(result, Err(DriverError::NotConfigured("link drivers"))));
    }

    #[test]
    fn test_build_requires_settings() {
        let (nominal, _) = LoopbackLink::new();
        let (redundant, _) = LoopbackLink::new();
        let result = CanTsBuilder::new()
            .address(0x10)
            .links(nominal, redundant)
            .build();
        assert!(matches!(result, Err(DriverError::NotConfigured("link settings"))));
    }

    #[test]
    fn test_build_rejects_broadcast_address() {
        let (nominal, _) = LoopbackLink::new();
        let (redundant, _) = LoopbackLink::new();
        let result = CanTsBuilder::new()
            .address(0x01)
            .settings(serial_settings())
            .links(nominal, redundant)
            .build();
        assert!(matches!(result, Err(DriverError::InvalidAddress(0x01))));
    }

    #[test]
    fn test_build_rejects_unknown_settings() {
        let (nominal, _) = LoopbackLink::new();
        let (redundant, _) = LoopbackLink::new();
        let result = CanTsBuilder::new()
            .address(0x10)
            .settings(LinkSettings::IpBridge {
                ip: 0x0A00_0001,
                port: 4560,
            })
            .links(nominal, redundant)
            .build();
        assert!(matches!(result, Err(DriverError::UnsupportedSettings)));
    }

    #[test]
    fn test_build_fails_when_open_fails() {
        let (nominal, handle) = LoopbackLink::new();
        let (redundant, _) = LoopbackLink::new();
        handle.set_fail_open(true);
        let result = CanTsBuilder::new()
            .address(0x10)
            .settings(serial_settings())
            .links(nominal, redundant)
            .build();
        assert!(matches!(result, Err(DriverError::Link(_))));
    }

    #[test]
    fn test_build_and_drop() {
        let (nominal, _h0) = LoopbackLink::new();
        let (redundant, _h1) = LoopbackLink::new();
        let stack = CanTsBuilder::new()
            .address(0x10)
            .settings(serial_settings())
            .links(nominal, redundant)
            .build()
            .unwrap();
        assert_eq!(stack.address(), 0x10);
        // Drop 时后台线程应被回收
        drop(stack);
    }
}
