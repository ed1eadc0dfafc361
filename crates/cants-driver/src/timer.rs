//! 单次触发软件定时器队列
//!
//! 传输状态机的看门狗与报告延迟都是单次定时器。队列由调度线程
//! 轮询：每处理完一个事件后以 `next_deadline` 计算等待上限，到期
//! 定时器经 `pop_expired` 取出后逐个分发。
//!
//! 定时器以稳定的 `TimerId` 标识，取消已触发或已取消的定时器是
//! 无害的空操作，因此已被移除的传输不可能被过期回调引用。

use std::time::Instant;

/// 定时器句柄
pub(crate) type TimerId = u64;

/// 定时器到期后要执行的动作（携带传输的稳定键）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// 遥控传输看门狗
    TcWatchdog { address: u8, channel: u8 },
    /// 遥测传输看门狗
    TmWatchdog { address: u8, channel: u8 },
    /// 块写入传输看门狗
    SbWatchdog { address: u8 },
    /// 块写入数据结束与状态请求之间的延迟
    SbReportDelay { address: u8 },
    /// 块读取传输看门狗
    GbWatchdog { address: u8 },
}

#[derive(Debug)]
struct TimerEntry {
    id: TimerId,
    deadline: Instant,
    kind: TimerKind,
}

/// 单次定时器队列
///
/// 同时在飞的定时器数量与在飞传输数量同阶（每个传输至多两个），
/// 线性扫描即可。
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    next_id: TimerId,
    entries: Vec<TimerEntry>,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            entries: Vec::new(),
        }
    }

    /// 启动一个单次定时器，返回其句柄。
    pub(crate) fn start(&mut self, kind: TimerKind, deadline: Instant) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(TimerEntry { id, deadline, kind });
        id
    }

    /// 取消定时器。对未知（已触发/已取消）句柄是空操作。
    pub(crate) fn cancel(&mut self, id: TimerId) {
        self.entries.retain(|e| e.id != id);
    }

    /// 最近的到期时刻。
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// 取出所有到期的定时器，按到期时刻排序。
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Vec<(TimerId, TimerKind)> {
        let mut expired: Vec<TimerEntry> = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].deadline <= now {
                expired.push(self.entries.remove(i));
            } else {
                i += 1;
            }
        }
        expired.sort_by_key(|e| e.deadline);
        expired.into_iter().map(|e| (e.id, e.kind)).collect()
    }

    /// 丢弃全部定时器。
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const KIND: TimerKind = TimerKind::SbWatchdog { address: 0x20 };

    #[test]
    fn test_start_and_expire() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        let id = queue.start(KIND, now + Duration::from_millis(100));

        assert!(queue.pop_expired(now).is_empty());
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_millis(100)));

        let expired = queue.pop_expired(now + Duration::from_millis(100));
        assert_eq!(expired, vec![(id, KIND)]);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        let id = queue.start(KIND, now + Duration::from_millis(10));
        queue.cancel(id);
        queue.cancel(id);
        assert!(queue.pop_expired(now + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_expired_ordering() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        let late = queue.start(TimerKind::TcWatchdog { address: 1, channel: 0 }, now + Duration::from_millis(20));
        let early = queue.start(TimerKind::TcWatchdog { address: 2, channel: 0 }, now + Duration::from_millis(10));

        let expired = queue.pop_expired(now + Duration::from_millis(30));
        assert_eq!(expired[0].0, early);
        assert_eq!(expired[1].0, late);
    }

    #[test]
    fn test_clear() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        queue.start(KIND, now + Duration::from_millis(10));
        queue.start(KIND, now + Duration::from_millis(20));
        queue.clear();
        assert_eq!(queue.next_deadline(), None);
    }
}
