// SPDX-License-Identifier: AGPL-3.0
// iDrop Core - Usage analytics
//
// Every send or receive attempt appends one event to the `analytics`
// collection. The admin dashboard derives its figures from that log:
// active users, daily active users, a 7-day series and the success rate.

use crate::store::{DocumentRef, DocumentStore, TimeQuery, ANALYTICS_COLLECTION};
use crate::transfer::{PayloadKind, TransferId};
use crate::types::AppError;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Days covered by the per-day series
pub const SERIES_DAYS: u32 = 7;
/// Rows in the "recent transfers" table
pub const RECENT_EVENTS: usize = 5;

/// Which flow recorded an event. Send events carry no action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Receive,
}

/// One entry of the append-only analytics log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: PayloadKind,
    pub success: bool,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<EventAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

fn default_count() -> u32 {
    1
}

impl AnalyticsEvent {
    fn new(kind: PayloadKind, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            success,
            count: 1,
            action: None,
            transfer_id: None,
            error: None,
            file_size: None,
            file_name: None,
        }
    }

    pub fn send_succeeded(
        kind: PayloadKind,
        id: TransferId,
        file_size: u64,
        file_name: Option<String>,
    ) -> Self {
        Self {
            transfer_id: Some(id.to_string()),
            file_size: Some(file_size),
            file_name,
            ..Self::new(kind, true)
        }
    }

    pub fn send_failed(
        kind: PayloadKind,
        error: impl Into<String>,
        file_size: u64,
        file_name: Option<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            file_size: Some(file_size),
            file_name,
            ..Self::new(kind, false)
        }
    }

    pub fn receive_succeeded(kind: PayloadKind, entered_id: &str) -> Self {
        Self {
            action: Some(EventAction::Receive),
            transfer_id: Some(entered_id.to_string()),
            ..Self::new(kind, true)
        }
    }

    pub fn receive_failed(error: impl Into<String>, entered_id: &str) -> Self {
        Self {
            action: Some(EventAction::Receive),
            transfer_id: Some(entered_id.to_string()),
            error: Some(error.into()),
            ..Self::new(PayloadKind::Unknown, false)
        }
    }
}

/// Append-only access to the `analytics` collection
#[derive(Clone)]
pub struct AnalyticsLog {
    store: Arc<dyn DocumentStore>,
}

impl AnalyticsLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, event: &AnalyticsEvent) -> Result<DocumentRef, AppError> {
        let body = serde_json::to_value(event)
            .map_err(|e| AppError::StoreWrite(format!("Failed to encode event: {}", e)))?;
        self.store.add(ANALYTICS_COLLECTION, body).await
    }

    /// Whole log, newest first
    pub async fn list_all(&self) -> Result<Vec<AnalyticsEvent>, AppError> {
        self.fetch(&TimeQuery::newest_first()).await
    }

    /// Events at or after `since`, newest first
    pub async fn list_since(&self, since: DateTime<Utc>) -> Result<Vec<AnalyticsEvent>, AppError> {
        self.fetch(&TimeQuery::newest_first().since(since)).await
    }

    async fn fetch(&self, query: &TimeQuery) -> Result<Vec<AnalyticsEvent>, AppError> {
        let docs = self.store.query(ANALYTICS_COLLECTION, query).await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| match serde_json::from_value(doc.body) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("Skipping malformed analytics event {}: {}", doc.reference.key, e);
                    None
                }
            })
            .collect())
    }
}

/// Transfers counted on one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    pub date: NaiveDate,
    /// Chart label such as "Oct 16"
    pub label: String,
    pub count: usize,
}

/// Everything the admin dashboard shows
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub active_users: usize,
    pub daily_active_users: usize,
    pub total_transfers: usize,
    /// Percentage, 0 when there are no events
    pub success_rate: u32,
    pub daily_transfers: Vec<DailyCount>,
    pub recent: Vec<AnalyticsEvent>,
}

/// Distinct transfer IDs among events at or after `since`
pub fn distinct_transfer_ids(events: &[AnalyticsEvent], since: DateTime<Utc>) -> usize {
    events
        .iter()
        .filter(|e| e.timestamp >= since)
        .filter_map(|e| e.transfer_id.as_deref())
        .filter(|id| !id.is_empty())
        .collect::<HashSet<_>>()
        .len()
}

/// `round(successes / total * 100)`, defined as 0 for an empty log
pub fn success_rate(events: &[AnalyticsEvent]) -> u32 {
    if events.is_empty() {
        return 0;
    }
    let successes = events.iter().filter(|e| e.success).count();
    (successes as f64 / events.len() as f64 * 100.0).round() as u32
}

/// Start of a calendar day in the given zone
fn day_start<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    first_local_instant(date.and_time(NaiveTime::MIN), |local| {
        tz.from_local_datetime(local)
            .earliest()
            .map(|start| start.with_timezone(&Utc))
    })
}

/// First instant at or after `midnight` that exists on the local clock.
/// A DST change may skip midnight itself.
fn first_local_instant(
    midnight: NaiveDateTime,
    resolve: impl Fn(&NaiveDateTime) -> Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    (0..=24 * 60)
        .map(|minutes| midnight + Duration::minutes(minutes))
        .find_map(|local| resolve(&local))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// Per-day event counts for the last `days` days ending today, oldest first
pub fn daily_series<Tz: TimeZone>(
    events: &[AnalyticsEvent],
    now: &DateTime<Tz>,
    days: u32,
) -> Vec<DailyCount> {
    let tz = now.timezone();
    let today = now.date_naive();

    (0..days)
        .rev()
        .map(|offset| {
            let date = today - Duration::days(i64::from(offset));
            let start = day_start(&tz, date);
            let end = day_start(&tz, date + Duration::days(1));
            let count = events
                .iter()
                .filter(|e| e.timestamp >= start && e.timestamp < end)
                .count();

            DailyCount {
                date,
                label: date.format("%b %-d").to_string(),
                count,
            }
        })
        .collect()
}

impl DashboardSnapshot {
    /// Derive the dashboard from the trailing-window events and the full log
    pub fn compute<Tz: TimeZone>(
        window_events: &[AnalyticsEvent],
        history: &[AnalyticsEvent],
        now: &DateTime<Tz>,
        active_window: Duration,
    ) -> Self {
        let now_utc = now.with_timezone(&Utc);
        let midnight = day_start(&now.timezone(), now.date_naive());

        Self {
            generated_at: now_utc,
            active_users: distinct_transfer_ids(window_events, now_utc - active_window),
            daily_active_users: distinct_transfer_ids(history, midnight),
            total_transfers: history.len(),
            success_rate: success_rate(history),
            daily_transfers: daily_series(history, now, SERIES_DAYS),
            recent: history.iter().take(RECENT_EVENTS).cloned().collect(),
        }
    }
}

/// Reads the analytics log and builds dashboard snapshots
#[derive(Clone)]
pub struct Aggregator {
    log: AnalyticsLog,
    active_window: Duration,
}

impl Aggregator {
    pub fn new(log: AnalyticsLog, active_window: std::time::Duration) -> Self {
        Self {
            log,
            active_window: Duration::from_std(active_window).unwrap_or(Duration::minutes(10)),
        }
    }

    /// Snapshot as of now, in the local time zone
    pub async fn snapshot(&self) -> Result<DashboardSnapshot, AppError> {
        self.snapshot_at(Local::now()).await
    }

    pub async fn snapshot_at<Tz: TimeZone>(
        &self,
        now: DateTime<Tz>,
    ) -> Result<DashboardSnapshot, AppError> {
        let since = now.with_timezone(&Utc) - self.active_window;
        let window_events = self.log.list_since(since).await?;
        let history = self.log.list_all().await?;
        Ok(DashboardSnapshot::compute(
            &window_events,
            &history,
            &now,
            self.active_window,
        ))
    }
}

/// Recomputes the dashboard on a fixed period while it is alive
pub struct DashboardRefresher {
    snapshots: watch::Receiver<Option<DashboardSnapshot>>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl DashboardRefresher {
    /// Fetch immediately, then every `period`
    pub fn start(aggregator: Aggregator, period: std::time::Duration) -> Self {
        let (snapshot_tx, snapshots) = watch::channel(None);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => break,
                }

                // A fetch that has started always runs to completion
                match aggregator.snapshot().await {
                    Ok(snapshot) => {
                        snapshot_tx.send_replace(Some(snapshot));
                    }
                    Err(e) => tracing::error!("Error fetching analytics: {}", e),
                }

                if *stop_rx.borrow() {
                    break;
                }
            }
            tracing::debug!("Dashboard refresher stopped");
        });

        Self {
            snapshots,
            stop_tx,
            task: Some(task),
        }
    }

    /// Most recent successful snapshot, if any
    pub fn latest(&self) -> Option<DashboardSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DashboardSnapshot>> {
        self.snapshots.clone()
    }

    /// Stop scheduling refreshes and wait for the task to wind down
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for DashboardRefresher {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::FixedOffset;

    fn event_at(timestamp: DateTime<Utc>, success: bool, id: Option<&str>) -> AnalyticsEvent {
        AnalyticsEvent {
            timestamp,
            transfer_id: id.map(str::to_string),
            ..AnalyticsEvent::new(PayloadKind::Text, success)
        }
    }

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    #[test]
    fn test_success_rate_empty_log_is_zero() {
        assert_eq!(success_rate(&[]), 0);
    }

    #[test]
    fn test_success_rate_seven_of_ten() {
        let now = Utc::now();
        let events: Vec<_> = (0..10).map(|i| event_at(now, i < 7, None)).collect();
        assert_eq!(success_rate(&events), 70);
    }

    #[test]
    fn test_success_rate_rounds_to_nearest() {
        let now = Utc::now();
        let events = vec![
            event_at(now, true, None),
            event_at(now, true, None),
            event_at(now, false, None),
        ];
        assert_eq!(success_rate(&events), 67);
    }

    #[test]
    fn test_distinct_ids_ignore_missing_and_old() {
        let now = Utc::now();
        let events = vec![
            event_at(now, true, Some("4821")),
            event_at(now - Duration::minutes(2), false, Some("4821")),
            event_at(now - Duration::minutes(3), true, Some("1234")),
            event_at(now - Duration::minutes(4), false, None),
            event_at(now - Duration::minutes(30), true, Some("5555")),
        ];
        assert_eq!(distinct_transfer_ids(&events, now - Duration::minutes(10)), 2);
    }

    #[test]
    fn test_daily_series_buckets_by_local_day() {
        // 2026-10-16 09:00 at UTC+2
        let now = tz().with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        let at = |d: u32, h: u32| {
            tz().with_ymd_and_hms(2026, 10, d, h, 0, 0)
                .unwrap()
                .with_timezone(&Utc)
        };
        let events = vec![
            event_at(at(16, 0), true, None),
            event_at(at(16, 8), true, None),
            event_at(at(15, 23), true, None),
            event_at(at(10, 12), true, None),
            // Eight days back falls outside the series
            event_at(at(8, 12), true, None),
        ];

        let series = daily_series(&events, &now, SERIES_DAYS);
        assert_eq!(series.len(), 7);
        assert_eq!(series[0].date, NaiveDate::from_ymd_opt(2026, 10, 10).unwrap());
        assert_eq!(series[0].label, "Oct 10");
        assert_eq!(series[6].label, "Oct 16");
        let counts: Vec<_> = series.iter().map(|d| d.count).collect();
        assert_eq!(counts, vec![1, 0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_day_start_skips_dst_gap() {
        // Clocks jump from 00:00 (UTC-3) to 01:00 (UTC-2)
        let midnight = NaiveDate::from_ymd_opt(2018, 11, 4)
            .unwrap()
            .and_time(NaiveTime::MIN);
        let one_am = NaiveTime::from_hms_opt(1, 0, 0).unwrap();
        let start = first_local_instant(midnight, |local| {
            (local.time() >= one_am).then(|| Utc.from_utc_datetime(&(*local + Duration::hours(2))))
        });
        assert_eq!(start, Utc.with_ymd_and_hms(2018, 11, 4, 3, 0, 0).unwrap());
    }

    #[test]
    fn test_day_start_without_gap_is_midnight() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert_eq!(
            day_start(&tz(), date),
            Utc.with_ymd_and_hms(2026, 10, 15, 22, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_snapshot_daily_active_users_since_midnight() {
        let now = tz().with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        let at = |d: u32, h: u32| {
            tz().with_ymd_and_hms(2026, 10, d, h, 0, 0)
                .unwrap()
                .with_timezone(&Utc)
        };
        let history = vec![
            event_at(at(16, 8), true, Some("1111")),
            event_at(at(16, 1), false, Some("2222")),
            event_at(at(16, 1), true, Some("1111")),
            event_at(at(15, 22), true, Some("3333")),
        ];

        let snapshot = DashboardSnapshot::compute(&history, &history, &now, Duration::minutes(10));
        assert_eq!(snapshot.daily_active_users, 2);
        assert_eq!(snapshot.active_users, 0);
        assert_eq!(snapshot.total_transfers, 4);
        assert_eq!(snapshot.success_rate, 75);
        assert_eq!(snapshot.recent.len(), 4);
    }

    #[test]
    fn test_send_event_omits_action() {
        let event = AnalyticsEvent::send_succeeded(PayloadKind::Text, 4821, 11, None);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["transferId"], "4821");
        assert_eq!(value["count"], 1);
        assert!(value.get("action").is_none());

        let receive = AnalyticsEvent::receive_failed("ID not found", "9999");
        let value = serde_json::to_value(&receive).unwrap();
        assert_eq!(value["action"], "receive");
        assert_eq!(value["type"], "unknown");
        assert_eq!(value["error"], "ID not found");
    }

    #[tokio::test]
    async fn test_aggregator_reads_store() {
        let log = AnalyticsLog::new(Arc::new(MemoryStore::new()));
        let now = Utc::now();
        for (minutes, id) in [(1, "1000"), (2, "2000"), (60, "3000")] {
            log.record(&event_at(now - Duration::minutes(minutes), true, Some(id)))
                .await
                .unwrap();
        }
        log.record(&event_at(now, false, None)).await.unwrap();

        let aggregator = Aggregator::new(log, std::time::Duration::from_secs(600));
        let snapshot = aggregator.snapshot_at(now).await.unwrap();
        assert_eq!(snapshot.active_users, 2);
        assert_eq!(snapshot.total_transfers, 4);
        assert_eq!(snapshot.success_rate, 75);
        assert!(!snapshot.recent[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_publishes_and_stops() {
        let log = AnalyticsLog::new(Arc::new(MemoryStore::new()));
        let aggregator = Aggregator::new(log.clone(), std::time::Duration::from_secs(600));
        let refresher = DashboardRefresher::start(aggregator, std::time::Duration::from_secs(30));
        let mut updates = refresher.subscribe();

        updates.changed().await.unwrap();
        assert_eq!(refresher.latest().unwrap().total_transfers, 0);

        log.record(&AnalyticsEvent::receive_failed("ID not found", "1234"))
            .await
            .unwrap();
        tokio::time::advance(std::time::Duration::from_secs(30)).await;
        updates.changed().await.unwrap();
        assert_eq!(refresher.latest().unwrap().total_transfers, 1);

        refresher.stop().await;
    }
}
