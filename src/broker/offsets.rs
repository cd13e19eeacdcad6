//! 分区提交水位
//!
//! 并发 worker 乱序完成时，只能提交到最低的未完成 offset，
//! 否则进程崩溃后仍在处理或已 nack 的记录不会被重新投递。

use std::collections::{BTreeSet, HashMap};

use super::DeliveryTag;

#[derive(Debug, Default)]
struct PartitionWatermark {
    in_flight: BTreeSet<i64>,
    /// 已完成的最大 offset + 1
    next: Option<i64>,
    committed: Option<i64>,
}

impl PartitionWatermark {
    fn begin(&mut self, offset: i64) {
        self.in_flight.insert(offset);
    }

    fn complete(&mut self, offset: i64) -> Option<i64> {
        self.in_flight.remove(&offset);
        let next = self.next.map_or(offset + 1, |next| next.max(offset + 1));
        self.next = Some(next);

        let candidate = self
            .in_flight
            .first()
            .map_or(next, |lowest| (*lowest).min(next));
        if self.committed.is_some_and(|committed| candidate <= committed) {
            return None;
        }
        self.committed = Some(candidate);
        Some(candidate)
    }
}

/// 按分区跟踪在途记录
///
/// `begin` 在记录交给消费方时调用；ack 或丢弃时 `complete`，
/// 返回值为需要提交的新 offset。nack 重新入队的记录保持在途，水位停在它之前。
#[derive(Debug, Default)]
pub(crate) struct OffsetTracker {
    partitions: HashMap<i32, PartitionWatermark>,
}

impl OffsetTracker {
    pub(crate) fn begin(&mut self, tag: DeliveryTag) {
        self.partitions
            .entry(tag.partition)
            .or_default()
            .begin(tag.offset);
    }

    pub(crate) fn complete(&mut self, tag: DeliveryTag) -> Option<i64> {
        self.partitions
            .entry(tag.partition)
            .or_default()
            .complete(tag.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(partition: i32, offset: i64) -> DeliveryTag {
        DeliveryTag { partition, offset }
    }

    #[test]
    fn in_order_completion_advances_one_by_one() {
        let mut tracker = OffsetTracker::default();
        tracker.begin(tag(0, 10));
        tracker.begin(tag(0, 11));
        assert_eq!(tracker.complete(tag(0, 10)), Some(11));
        assert_eq!(tracker.complete(tag(0, 11)), Some(12));
    }

    #[test]
    fn out_of_order_ack_never_passes_a_running_record() {
        let mut tracker = OffsetTracker::default();
        for offset in 10..=12 {
            tracker.begin(tag(0, offset));
        }

        // 11、12 先完成，10 仍在处理
        assert_eq!(tracker.complete(tag(0, 11)), Some(10));
        assert!(tracker.complete(tag(0, 12)).is_none());

        assert_eq!(tracker.complete(tag(0, 10)), Some(13));
    }

    #[test]
    fn requeued_record_holds_the_watermark_until_redelivered() {
        let mut tracker = OffsetTracker::default();
        tracker.begin(tag(0, 5));
        tracker.begin(tag(0, 6));
        assert_eq!(tracker.complete(tag(0, 5)), Some(6));

        // 6 被 nack 重新入队：不 complete，seek 后 6、7 再次投递
        tracker.begin(tag(0, 7));
        assert!(tracker.complete(tag(0, 7)).is_none());
        tracker.begin(tag(0, 6));
        tracker.begin(tag(0, 7));
        assert!(tracker.complete(tag(0, 7)).is_none());

        assert_eq!(tracker.complete(tag(0, 6)), Some(8));
    }

    #[test]
    fn partitions_are_tracked_independently() {
        let mut tracker = OffsetTracker::default();
        tracker.begin(tag(0, 1));
        tracker.begin(tag(1, 100));
        assert_eq!(tracker.complete(tag(1, 100)), Some(101));
        assert_eq!(tracker.complete(tag(0, 1)), Some(2));
    }
}
