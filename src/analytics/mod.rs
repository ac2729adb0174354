//! Delivery analytics aggregation.
//!
//! Rolls closed delivery records up into counts, rates, cost and an hourly
//! time series. Aggregation is a pure function of its inputs: recomputed
//! fresh on every call, never partially updated.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::delivery::{DeliveryRecord, DeliveryStatus};

const SECONDS_PER_HOUR: i64 = 3_600;

/// Aggregate view over a set of delivery records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    /// Pairs with at least one delivery attempt
    pub sent: u64,
    /// Pairs that reached a delivered-class state
    pub delivered: u64,
    /// Pairs terminally failed (excluding bounces)
    pub failed: u64,
    /// Pairs that hard-bounced
    pub bounced: u64,
    /// Pairs read by the recipient
    pub opened: u64,
    /// Pairs clicked through
    pub clicked: u64,
    /// Pairs converted
    pub converted: u64,

    /// delivered / sent * 100
    pub delivery_rate: f64,
    /// opened / delivered * 100
    pub open_rate: f64,
    /// clicked / opened * 100
    pub click_rate: f64,
    /// converted / clicked * 100
    pub conversion_rate: f64,

    /// Mean response time across delivered attempts, in milliseconds
    pub average_delivery_time_ms: f64,

    /// Summed attempt cost
    pub total_cost: f64,
    /// total_cost / sent
    pub cost_per_notification: f64,

    /// Same counts partitioned by channel, sorted by channel
    pub by_channel: Vec<ChannelStats>,

    /// Fixed hourly buckets covering the window, gap-free
    pub hourly: Vec<HourlyBucket>,

    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Per-channel slice of the aggregate counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStats {
    pub channel: Channel,
    pub sent: u64,
    pub delivered: u64,
    pub failed: u64,
    pub bounced: u64,
    pub opened: u64,
    pub clicked: u64,
    pub converted: u64,
    pub delivery_rate: f64,
}

/// One hour of attempt activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyBucket {
    pub bucket_start: DateTime<Utc>,
    pub attempted: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// A rate with a zero denominator is 0, never NaN.
fn rate(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64 * 100.0
    }
}

#[derive(Default)]
struct Counts {
    sent: u64,
    delivered: u64,
    failed: u64,
    bounced: u64,
    opened: u64,
    clicked: u64,
    converted: u64,
}

impl Counts {
    fn add(&mut self, record: &DeliveryRecord) {
        if record.attempts.is_empty() {
            return;
        }
        self.sent += 1;

        if record.status.is_delivered_class() {
            self.delivered += 1;
        }
        match record.status {
            DeliveryStatus::Failed => self.failed += 1,
            DeliveryStatus::Bounced => self.bounced += 1,
            _ => {}
        }

        if let Some(reached) = record.status.engagement_rank() {
            if reached >= 1 {
                self.opened += 1;
            }
            if reached >= 2 {
                self.clicked += 1;
            }
            if reached >= 3 {
                self.converted += 1;
            }
        }
    }
}

/// Aggregate records into a snapshot for the given window.
///
/// Every bucket between `window_start` and `window_end` appears, including
/// empty ones; attempts outside the window still count toward totals but are
/// not bucketed.
pub fn aggregate(
    records: &[DeliveryRecord],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> AnalyticsSnapshot {
    let mut totals = Counts::default();
    let mut per_channel: BTreeMap<Channel, Counts> = BTreeMap::new();

    let mut delivered_time_sum: u64 = 0;
    let mut delivered_time_count: u64 = 0;
    let mut total_cost = 0.0;

    for record in records {
        totals.add(record);
        per_channel.entry(record.channel).or_default().add(record);

        for attempt in &record.attempts {
            if attempt.status.is_delivered_class() {
                delivered_time_sum += attempt.response_time_ms;
                delivered_time_count += 1;
            }
            if let Some(cost) = attempt.cost {
                total_cost += cost;
            }
        }
    }

    let hourly = build_hourly_buckets(records, window_start, window_end);

    let by_channel = per_channel
        .into_iter()
        .map(|(channel, counts)| ChannelStats {
            channel,
            delivery_rate: rate(counts.delivered, counts.sent),
            sent: counts.sent,
            delivered: counts.delivered,
            failed: counts.failed,
            bounced: counts.bounced,
            opened: counts.opened,
            clicked: counts.clicked,
            converted: counts.converted,
        })
        .collect();

    let average_delivery_time_ms = if delivered_time_count == 0 {
        0.0
    } else {
        delivered_time_sum as f64 / delivered_time_count as f64
    };

    let cost_per_notification = if totals.sent == 0 {
        0.0
    } else {
        total_cost / totals.sent as f64
    };

    AnalyticsSnapshot {
        delivery_rate: rate(totals.delivered, totals.sent),
        open_rate: rate(totals.opened, totals.delivered),
        click_rate: rate(totals.clicked, totals.opened),
        conversion_rate: rate(totals.converted, totals.clicked),
        sent: totals.sent,
        delivered: totals.delivered,
        failed: totals.failed,
        bounced: totals.bounced,
        opened: totals.opened,
        clicked: totals.clicked,
        converted: totals.converted,
        average_delivery_time_ms,
        total_cost,
        cost_per_notification,
        by_channel,
        hourly,
        window_start,
        window_end,
    }
}

fn build_hourly_buckets(
    records: &[DeliveryRecord],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<HourlyBucket> {
    if window_end < window_start {
        return Vec::new();
    }

    let first_hour = window_start.timestamp().div_euclid(SECONDS_PER_HOUR) * SECONDS_PER_HOUR;
    let end_ts = window_end.timestamp();
    let bucket_count = ((end_ts - first_hour) / SECONDS_PER_HOUR + 1) as usize;

    let mut buckets: Vec<HourlyBucket> = (0..bucket_count)
        .map(|i| {
            let start_ts = first_hour + i as i64 * SECONDS_PER_HOUR;
            HourlyBucket {
                bucket_start: DateTime::from_timestamp(start_ts, 0).unwrap_or(window_start),
                attempted: 0,
                delivered: 0,
                failed: 0,
            }
        })
        .collect();

    for record in records {
        for attempt in &record.attempts {
            let ts = attempt.attempted_at.timestamp();
            if ts < first_hour || ts > end_ts {
                continue;
            }
            let index = ((ts - first_hour) / SECONDS_PER_HOUR) as usize;
            if let Some(bucket) = buckets.get_mut(index) {
                bucket.attempted += 1;
                if attempt.status.is_delivered_class() {
                    bucket.delivered += 1;
                } else {
                    bucket.failed += 1;
                }
            }
        }
    }

    buckets
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use crate::delivery::{DeliveryAttempt, Engagement};

    use super::*;

    fn attempt_at(at: DateTime<Utc>, status: DeliveryStatus, response_ms: u64) -> DeliveryAttempt {
        DeliveryAttempt {
            attempt_number: 1,
            attempted_at: at,
            status,
            error_code: None,
            error_message: None,
            response_time_ms: response_ms,
            provider_ref: None,
            cost: Some(0.01),
        }
    }

    fn record_with(
        channel: Channel,
        status: DeliveryStatus,
        attempts: Vec<DeliveryAttempt>,
    ) -> DeliveryRecord {
        let mut r = DeliveryRecord::new("r1", channel);
        r.begin_sending();
        for a in attempts {
            r.push_attempt(a);
        }
        r.finalize(status, Utc::now());
        r
    }

    #[test]
    fn test_zero_records_all_rates_zero() {
        let now = Utc::now();
        let snapshot = aggregate(&[], now, now);

        assert_eq!(snapshot.sent, 0);
        assert_eq!(snapshot.delivery_rate, 0.0);
        assert_eq!(snapshot.open_rate, 0.0);
        assert_eq!(snapshot.click_rate, 0.0);
        assert_eq!(snapshot.conversion_rate, 0.0);
        assert_eq!(snapshot.average_delivery_time_ms, 0.0);
        assert_eq!(snapshot.cost_per_notification, 0.0);
        assert!(snapshot.by_channel.is_empty());
    }

    #[test]
    fn test_rates_and_counts() {
        let now = Utc::now();
        let delivered = record_with(
            Channel::Email,
            DeliveryStatus::Delivered,
            vec![attempt_at(now, DeliveryStatus::Delivered, 100)],
        );
        let failed = record_with(
            Channel::Email,
            DeliveryStatus::Failed,
            vec![
                attempt_at(now, DeliveryStatus::Failed, 50),
                attempt_at(now, DeliveryStatus::Failed, 60),
            ],
        );
        let mut engaged = record_with(
            Channel::Sms,
            DeliveryStatus::Delivered,
            vec![attempt_at(now, DeliveryStatus::Delivered, 200)],
        );
        engaged.record_engagement(Engagement::Read, now).unwrap();
        engaged.record_engagement(Engagement::Clicked, now).unwrap();

        let snapshot = aggregate(&[delivered, failed, engaged], now, now);

        assert_eq!(snapshot.sent, 3);
        assert_eq!(snapshot.delivered, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.opened, 1);
        assert_eq!(snapshot.clicked, 1);
        assert_eq!(snapshot.converted, 0);

        assert!((snapshot.delivery_rate - 66.666).abs() < 0.01);
        assert!((snapshot.open_rate - 50.0).abs() < f64::EPSILON);
        assert!((snapshot.click_rate - 100.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.conversion_rate, 0.0);

        // Mean of the delivered attempts only: (100 + 200) / 2.
        assert!((snapshot.average_delivery_time_ms - 150.0).abs() < f64::EPSILON);

        // 4 attempts at 0.01 each across 3 sent pairs.
        assert!((snapshot.total_cost - 0.04).abs() < 1e-9);
        assert!((snapshot.cost_per_notification - 0.04 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_per_channel_breakdown() {
        let now = Utc::now();
        let email = record_with(
            Channel::Email,
            DeliveryStatus::Delivered,
            vec![attempt_at(now, DeliveryStatus::Delivered, 10)],
        );
        let sms = record_with(
            Channel::Sms,
            DeliveryStatus::Failed,
            vec![attempt_at(now, DeliveryStatus::Failed, 10)],
        );

        let snapshot = aggregate(&[email, sms], now, now);
        assert_eq!(snapshot.by_channel.len(), 2);

        let email_stats = snapshot
            .by_channel
            .iter()
            .find(|s| s.channel == Channel::Email)
            .unwrap();
        assert_eq!(email_stats.sent, 1);
        assert_eq!(email_stats.delivered, 1);
        assert_eq!(email_stats.delivery_rate, 100.0);

        let sms_stats = snapshot
            .by_channel
            .iter()
            .find(|s| s.channel == Channel::Sms)
            .unwrap();
        assert_eq!(sms_stats.failed, 1);
        assert_eq!(sms_stats.delivery_rate, 0.0);
    }

    #[test]
    fn test_hourly_buckets_gap_free() {
        let start = Utc.with_ymd_and_hms(2026, 3, 4, 10, 15, 0).unwrap();
        let end = start + Duration::hours(3);

        // One attempt in the first hour, one in the last; the middle buckets
        // must still appear with zero counts.
        let early = record_with(
            Channel::Email,
            DeliveryStatus::Delivered,
            vec![attempt_at(start, DeliveryStatus::Delivered, 10)],
        );
        let late = record_with(
            Channel::Email,
            DeliveryStatus::Failed,
            vec![attempt_at(end, DeliveryStatus::Failed, 10)],
        );

        let snapshot = aggregate(&[early, late], start, end);

        assert_eq!(snapshot.hourly.len(), 4);
        assert_eq!(snapshot.hourly[0].attempted, 1);
        assert_eq!(snapshot.hourly[0].delivered, 1);
        assert_eq!(snapshot.hourly[1].attempted, 0);
        assert_eq!(snapshot.hourly[2].attempted, 0);
        assert_eq!(snapshot.hourly[3].attempted, 1);
        assert_eq!(snapshot.hourly[3].failed, 1);

        // Buckets are aligned to the hour.
        assert_eq!(
            snapshot.hourly[0].bucket_start,
            Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_unattempted_records_not_counted_as_sent() {
        let cancelled = DeliveryRecord::cancelled("r1", Channel::Email, Utc::now());
        let now = Utc::now();
        let snapshot = aggregate(&[cancelled], now, now);
        assert_eq!(snapshot.sent, 0);
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let now = Utc::now();
        let records = vec![record_with(
            Channel::Email,
            DeliveryStatus::Delivered,
            vec![attempt_at(now, DeliveryStatus::Delivered, 42)],
        )];

        let first = aggregate(&records, now, now);
        let second = aggregate(&records, now, now);

        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }
}
