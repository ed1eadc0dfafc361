//! 全栈集成测试
//!
//! 经 Builder 构建完整协议栈（后台调度线程 + 回环链路），以真实
//! 定时器驱动。协议状态机的细粒度场景在各模块的单元测试中以虚拟
//! 时钟覆盖，这里验证线程化后的端到端行为。

use cants_can::{LinkSettings, LoopbackHandle, LoopbackLink};
use cants_driver::{CanBus, CanTs, CanTsEvent, SendTcError};
use cants_protocol::{CanTsFrame, SetBlockFrameType};
use std::time::Duration;

const LOCAL: u8 = 0x10;
const REMOTE: u8 = 0x20;
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn build_stack() -> (CanTs, LoopbackHandle, LoopbackHandle) {
    let (nominal, nominal_handle) = LoopbackLink::new();
    let (redundant, redundant_handle) = LoopbackLink::new();

    let stack = CanTs::builder()
        .address(LOCAL)
        .timeout(Duration::from_millis(50))
        .settings(LinkSettings::SerialBridge {
            port_name_nominal: "loop0".to_string(),
            port_name_redundant: "loop1".to_string(),
            baud: 115_200,
        })
        .links(nominal, redundant)
        .build()
        .unwrap();

    (stack, nominal_handle, redundant_handle)
}

/// 轮询取出活动总线上已发送的帧，直至超时。
fn wait_sent(handle: &LoopbackHandle) -> Vec<CanTsFrame> {
    let deadline = std::time::Instant::now() + RECV_TIMEOUT;
    loop {
        let sent = handle.take_sent();
        if !sent.is_empty() {
            return sent
                .iter()
                .map(|frame| CanTsFrame::from_can_frame(frame).unwrap())
                .collect();
        }
        if std::time::Instant::now() > deadline {
            panic!("no frame sent within timeout");
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_tc_happy_path_end_to_end() {
    let (stack, nominal, _redundant) = build_stack();
    let events = stack.events();

    stack.send_tc(REMOTE, 0, &[0x01], 0).unwrap();
    let sent = wait_sent(&nominal);
    assert_eq!(sent, vec![CanTsFrame::telecommand_request(REMOTE, LOCAL, 0, &[0x01])]);

    nominal.inject_frame(CanTsFrame::telecommand_ack(LOCAL, REMOTE, 0).to_can_frame());

    assert_eq!(
        events.recv_timeout(RECV_TIMEOUT).unwrap(),
        CanTsEvent::SendTcCompleted {
            address: REMOTE,
            channel: 0,
        }
    );
}

#[test]
fn test_tc_max_retries_end_to_end() {
    let (stack, _nominal, _redundant) = build_stack();
    let events = stack.events();

    // 无响应：初始尝试 + 2 次重试全部超时
    stack.send_tc(REMOTE, 0, &[0x01], 2).unwrap();

    assert_eq!(
        events.recv_timeout(RECV_TIMEOUT).unwrap(),
        CanTsEvent::SendTcFailed {
            address: REMOTE,
            channel: 0,
            error: SendTcError::MaxRetriesReached,
        }
    );
}

#[test]
fn test_tm_happy_path_end_to_end() {
    let (stack, nominal, _redundant) = build_stack();
    let events = stack.events();

    stack.receive_tm(REMOTE, 2, 3).unwrap();
    wait_sent(&nominal);
    nominal.inject_frame(CanTsFrame::telemetry_ack(LOCAL, REMOTE, 2, &[0x42]).to_can_frame());

    assert_eq!(
        events.recv_timeout(RECV_TIMEOUT).unwrap(),
        CanTsEvent::ReceiveTmCompleted {
            address: REMOTE,
            channel: 2,
            data: vec![0x42],
        }
    );
}

#[test]
fn test_send_block_end_to_end_with_responder() {
    let (stack, nominal, _redundant) = build_stack();
    let events = stack.events();

    let data: Vec<u8> = (0..10).collect();
    stack
        .send_block(REMOTE, 0x1234, &data, 3, Duration::from_millis(10), 3)
        .unwrap();

    // 脚本化的远端：确认请求、吸收数据、报告完成、确认中止
    let responder = std::thread::spawn(move || {
        let deadline = std::time::Instant::now() + RECV_TIMEOUT;
        let mut received = 0u8;
        while std::time::Instant::now() < deadline {
            for can_frame in nominal.take_sent() {
                let frame = CanTsFrame::from_can_frame(&can_frame).unwrap();
                match frame.sb_frame_type() {
                    Some(SetBlockFrameType::Request) => {
                        nominal.inject_frame(
                            CanTsFrame::set_block_ack(LOCAL, REMOTE, 1, &[0x34, 0x12])
                                .to_can_frame(),
                        );
                    },
                    Some(SetBlockFrameType::Transfer) => {
                        received += 1;
                    },
                    Some(SetBlockFrameType::Status) => {
                        assert_eq!(received, 2);
                        nominal.inject_frame(
                            CanTsFrame::set_block_report(LOCAL, REMOTE, true, &[0x03])
                                .to_can_frame(),
                        );
                    },
                    Some(SetBlockFrameType::Abort) => {
                        nominal.inject_frame(
                            CanTsFrame::set_block_ack(LOCAL, REMOTE, 0, &[]).to_can_frame(),
                        );
                        return;
                    },
                    _ => {},
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("responder timed out");
    });

    assert_eq!(
        events.recv_timeout(RECV_TIMEOUT).unwrap(),
        CanTsEvent::SendBlockCompleted { address: REMOTE }
    );
    responder.join().unwrap();
}

#[test]
fn test_keep_alive_on_both_buses() {
    let (stack, nominal, redundant) = build_stack();
    let events = stack.events();

    let keep_alive = CanTsFrame::unsolicited(0x01, REMOTE, 0, &[]);
    redundant.inject_frame(keep_alive.to_can_frame());
    assert_eq!(
        events.recv_timeout(RECV_TIMEOUT).unwrap(),
        CanTsEvent::KeepAliveReceivedRedundant {
            address: REMOTE,
            channel: 0,
            data: vec![],
        }
    );

    nominal.inject_frame(keep_alive.to_can_frame());
    assert_eq!(
        events.recv_timeout(RECV_TIMEOUT).unwrap(),
        CanTsEvent::KeepAliveReceivedNominal {
            address: REMOTE,
            channel: 0,
            data: vec![],
        }
    );
}

#[test]
fn test_bus_switch_abandons_transfers_silently() {
    let (stack, _nominal, _redundant) = build_stack();
    let events = stack.events();

    assert_eq!(stack.active_bus(), CanBus::Nominal);
    stack.send_tc(REMOTE, 0, &[0x01], 3).unwrap();
    stack.bus_switch();
    assert_eq!(stack.active_bus(), CanBus::Redundant);

    // 被放弃的传输不发射终止事件（看门狗也被丢弃）
    assert!(events.recv_timeout(Duration::from_millis(200)).is_err());

    // 切换后可以立即向同一地址重新发起传输
    stack.send_tc(REMOTE, 0, &[0x01], 3).unwrap();
}

#[test]
fn test_stop_is_silent_and_idempotent() {
    let (mut stack, _nominal, _redundant) = build_stack();
    let events = stack.events();

    stack.send_tc(REMOTE, 0, &[0x01], 3).unwrap();
    stack.stop();
    stack.stop();

    assert!(events.recv_timeout(Duration::from_millis(100)).is_err());

    // 停机后 API 调用被拒绝
    assert!(stack.send_tc(REMOTE, 0, &[0x01], 0).is_err());
}

#[test]
fn test_unsolicited_receive_end_to_end() {
    let (stack, nominal, _redundant) = build_stack();
    let events = stack.events();

    nominal.inject_frame(CanTsFrame::unsolicited(LOCAL, REMOTE, 9, &[0x5A]).to_can_frame());
    assert_eq!(
        events.recv_timeout(RECV_TIMEOUT).unwrap(),
        CanTsEvent::UnsolicitedReceived {
            address: REMOTE,
            channel: 9,
            data: vec![0x5A],
        }
    );
}
