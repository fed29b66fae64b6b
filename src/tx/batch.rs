//! Work items and batch formation
//!
//! Pending work (price updates, due alarms) is partitioned into same-kind,
//! order-preserving chunks bounded by the per-kind group limit. A batch is
//! the atomic unit of submission: it is never split after creation and is
//! consumed by exactly one transaction.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};

use crate::messages::{AlarmId, CoinDto, ExecuteMsg, PriceDto};

/// One observed spot price, ready to be fed to the oracle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    pub base_ticker: String,
    pub base_amount: String,
    pub quote_ticker: String,
    pub quote_amount: String,
    pub observed_at: DateTime<Utc>,
}

/// A unit of pending work awaiting dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    PriceUpdate(PriceUpdate),
    PriceAlarm(AlarmId),
    TimeAlarm(AlarmId),
}

impl WorkItem {
    pub fn kind(&self) -> WorkKind {
        match self {
            WorkItem::PriceUpdate(_) => WorkKind::PriceUpdate,
            WorkItem::PriceAlarm(_) => WorkKind::PriceAlarm,
            WorkItem::TimeAlarm(_) => WorkKind::TimeAlarm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKind {
    PriceUpdate,
    PriceAlarm,
    TimeAlarm,
}

impl WorkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkKind::PriceUpdate => "price_update",
            WorkKind::PriceAlarm => "price_alarm",
            WorkKind::TimeAlarm => "time_alarm",
        }
    }
}

/// The two alarm families the dispatcher polls for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    Price,
    Time,
}

impl AlarmKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlarmKind::Price => "price",
            AlarmKind::Time => "time",
        }
    }

    pub fn work_item(self, id: AlarmId) -> WorkItem {
        match self {
            AlarmKind::Price => WorkItem::PriceAlarm(id),
            AlarmKind::Time => WorkItem::TimeAlarm(id),
        }
    }
}

/// Per-kind batch size limits
///
/// Alarm groups are bounded by configuration; the price updates of one cycle
/// always travel as a single set.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    price_alarms: Option<NonZeroUsize>,
    time_alarms: Option<NonZeroUsize>,
}

impl BatchLimits {
    pub const fn new(price_alarms: NonZeroUsize, time_alarms: NonZeroUsize) -> Self {
        Self {
            price_alarms: Some(price_alarms),
            time_alarms: Some(time_alarms),
        }
    }

    /// No alarm limits; used by the feeder, which only ever batches prices
    pub const fn unbounded() -> Self {
        Self {
            price_alarms: None,
            time_alarms: None,
        }
    }

    fn for_kind(&self, kind: WorkKind) -> usize {
        match kind {
            WorkKind::PriceUpdate => usize::MAX,
            WorkKind::PriceAlarm => self.price_alarms.map_or(usize::MAX, NonZeroUsize::get),
            WorkKind::TimeAlarm => self.time_alarms.map_or(usize::MAX, NonZeroUsize::get),
        }
    }
}

/// A bounded group of same-kind work items submitted as one transaction
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    kind: WorkKind,
    items: &'a [WorkItem],
}

impl<'a> Batch<'a> {
    pub fn kind(&self) -> WorkKind {
        self.kind
    }

    pub fn items(&self) -> &'a [WorkItem] {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Render the batch as the contract call dispatching it
    pub fn to_execute_msg(&self) -> ExecuteMsg {
        match self.kind {
            WorkKind::PriceUpdate => ExecuteMsg::FeedPrices {
                prices: self
                    .items
                    .iter()
                    .filter_map(|item| match item {
                        WorkItem::PriceUpdate(price) => Some(PriceDto {
                            amount: CoinDto {
                                amount: price.base_amount.clone(),
                                ticker: price.base_ticker.clone(),
                            },
                            amount_quote: CoinDto {
                                amount: price.quote_amount.clone(),
                                ticker: price.quote_ticker.clone(),
                            },
                        }),
                        _ => None,
                    })
                    .collect(),
            },
            WorkKind::PriceAlarm => ExecuteMsg::DispatchPriceAlarms {
                ids: self.alarm_ids(),
            },
            WorkKind::TimeAlarm => ExecuteMsg::DispatchTimeAlarms {
                ids: self.alarm_ids(),
            },
        }
    }

    fn alarm_ids(&self) -> Vec<AlarmId> {
        self.items
            .iter()
            .filter_map(|item| match item {
                WorkItem::PriceAlarm(id) | WorkItem::TimeAlarm(id) => Some(*id),
                WorkItem::PriceUpdate(_) => None,
            })
            .collect()
    }
}

/// Partition pending work into batches
///
/// A batch extends while the next item has the same kind and the batch is
/// below the kind's limit, so arrival order is preserved and the
/// concatenation of all produced batches equals the input. The returned
/// iterator borrows the queue and can be recreated at will.
pub fn form_batches<'a>(pending: &'a [WorkItem], limits: &BatchLimits) -> Batches<'a> {
    Batches {
        remaining: pending,
        limits: *limits,
    }
}

/// Lazy, finite sequence of batches over a pending queue
pub struct Batches<'a> {
    remaining: &'a [WorkItem],
    limits: BatchLimits,
}

impl<'a> Iterator for Batches<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Batch<'a>> {
        let kind = self.remaining.first()?.kind();
        let limit = self.limits.for_kind(kind);

        let mut len = 1;
        while len < limit
            && self
                .remaining
                .get(len)
                .is_some_and(|item| item.kind() == kind)
        {
            len += 1;
        }

        let (items, rest) = self.remaining.split_at(len);
        self.remaining = rest;

        Some(Batch { kind, items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(price: usize, time: usize) -> BatchLimits {
        BatchLimits::new(
            NonZeroUsize::new(price).unwrap(),
            NonZeroUsize::new(time).unwrap(),
        )
    }

    fn time_alarms(count: u64) -> Vec<WorkItem> {
        (0..count).map(WorkItem::TimeAlarm).collect()
    }

    #[test]
    fn backlog_splits_into_bounded_groups() {
        let pending = time_alarms(75);

        let sizes: Vec<usize> = form_batches(&pending, &limits(32, 32))
            .map(|batch| batch.len())
            .collect();

        assert_eq!(sizes, vec![32, 32, 11]);
    }

    #[test]
    fn concatenation_preserves_input_order() {
        let mut pending = time_alarms(40);
        pending.push(WorkItem::PriceAlarm(100));
        pending.push(WorkItem::PriceAlarm(101));
        pending.extend(time_alarms(3));

        let rejoined: Vec<WorkItem> = form_batches(&pending, &limits(8, 16))
            .flat_map(|batch| batch.items().to_vec())
            .collect();

        assert_eq!(rejoined, pending);
    }

    #[test]
    fn batches_never_mix_kinds() {
        let pending = vec![
            WorkItem::TimeAlarm(1),
            WorkItem::PriceAlarm(2),
            WorkItem::TimeAlarm(3),
        ];

        for batch in form_batches(&pending, &limits(32, 32)) {
            assert_eq!(batch.len(), 1);
            assert!(batch.items().iter().all(|item| item.kind() == batch.kind()));
        }
    }

    #[test]
    fn group_limit_one_yields_singletons() {
        let pending = time_alarms(4);

        let sizes: Vec<usize> = form_batches(&pending, &limits(1, 1))
            .map(|batch| batch.len())
            .collect();

        assert_eq!(sizes, vec![1, 1, 1, 1]);
    }

    #[test]
    fn restartable_without_mutating_the_queue() {
        let pending = time_alarms(10);

        let first: Vec<usize> = form_batches(&pending, &limits(4, 4)).map(|b| b.len()).collect();
        let second: Vec<usize> = form_batches(&pending, &limits(4, 4)).map(|b| b.len()).collect();

        assert_eq!(first, second);
        assert_eq!(pending.len(), 10);
    }

    #[test]
    fn empty_queue_yields_no_batches() {
        assert_eq!(form_batches(&[], &limits(8, 8)).count(), 0);
    }

    #[test]
    fn alarm_batch_renders_dispatch_message() {
        let pending = vec![WorkItem::PriceAlarm(7), WorkItem::PriceAlarm(9)];

        let batch = form_batches(&pending, &limits(32, 32)).next().unwrap();

        match batch.to_execute_msg() {
            ExecuteMsg::DispatchPriceAlarms { ids } => assert_eq!(ids, vec![7, 9]),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
