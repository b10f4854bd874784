//! Read-side queries and compliance reporting
//!
//! Each query routes to the tier whose guarantees fit: timelines come from
//! the durable chain, dashboards from the realtime tier, and compliance
//! aggregates from the analytical tier. Reports built from the analytical
//! tier quote its freshness watermark so a reader can judge staleness.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{EventFilter, LedgerEvent, SessionId, UserId};
use crate::infra::{AnalyticalStore, DurableStore, RealtimeStore, Result};

/// HIPAA requires audit records be retained for six years; we keep seven to
/// leave margin for state-level extensions.
pub const HIPAA_RETENTION_YEARS: i32 = 7;

/// Parameters for repeated-denial detection.
#[derive(Debug, Clone)]
pub struct SuspiciousPatternConfig {
    /// Sliding window length
    pub window: Duration,
    /// Denials within one window that trigger a finding
    pub threshold: usize,
}

impl Default for SuspiciousPatternConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            threshold: 3,
        }
    }
}

/// A burst of access denials attributed to one principal.
#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousPattern {
    pub user_id: Option<UserId>,
    pub denied_count: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// HIPAA-oriented audit summary over a reporting period.
#[derive(Debug, Clone, Serialize)]
pub struct HipaaAuditReport {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_events: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub access_granted_count: u64,
    pub access_denied_count: u64,
    pub suspicious_patterns: Vec<SuspiciousPattern>,
    /// Retention policy in force when the report was generated
    pub retention_years: i32,
    /// Analytical tier watermark at generation time
    pub data_freshness: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

/// GDPR Article 15 subject access report: everything the ledger holds that
/// is attributable to one user.
#[derive(Debug, Clone, Serialize)]
pub struct GdprAccessReport {
    pub user_id: UserId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_events: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub events: Vec<LedgerEvent>,
    pub data_freshness: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
}

/// Read-side facade over the three tiers.
pub struct QueryService {
    durable: Arc<dyn DurableStore>,
    realtime: Arc<dyn RealtimeStore>,
    analytical: Arc<dyn AnalyticalStore>,
    suspicious: SuspiciousPatternConfig,
}

impl QueryService {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        realtime: Arc<dyn RealtimeStore>,
        analytical: Arc<dyn AnalyticalStore>,
    ) -> Self {
        Self {
            durable,
            realtime,
            analytical,
            suspicious: SuspiciousPatternConfig::default(),
        }
    }

    pub fn with_suspicious_config(mut self, config: SuspiciousPatternConfig) -> Self {
        self.suspicious = config;
        self
    }

    /// Every committed event for one session, in chain order. Served from
    /// the durable tier; this is the authoritative record.
    pub async fn get_session_timeline(&self, session_id: &SessionId) -> Result<Vec<LedgerEvent>> {
        self.durable.read_session(session_id).await
    }

    /// Recent matching events from the realtime tier, newest first.
    /// Non-authoritative; may lag or lead the durable chain.
    pub async fn get_real_time_events(
        &self,
        filter: &EventFilter,
        limit: usize,
    ) -> Result<Vec<LedgerEvent>> {
        self.realtime.recent(filter, limit).await
    }

    /// Access-category events for one user over a period, from the
    /// analytical tier.
    pub async fn get_user_access_log(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>> {
        self.analytical
            .access_events(Some(user_id), start, end)
            .await
    }

    /// Build the periodic HIPAA audit summary.
    pub async fn generate_hipaa_audit_report(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<HipaaAuditReport> {
        let retention_floor = retention_floor(Utc::now());
        if period_start < retention_floor {
            warn!(
                requested_start = %period_start,
                retention_floor = %retention_floor,
                "audit period predates the retention window, results may be archived"
            );
        }

        let events_by_type = self.analytical.count_by_type(period_start, period_end).await?;
        let total_events: u64 = events_by_type.values().sum();
        let access_granted_count = events_by_type.get("access.granted").copied().unwrap_or(0);
        let access_denied_count = events_by_type.get("access.denied").copied().unwrap_or(0);

        let access_events = self
            .analytical
            .access_events(None, period_start, period_end)
            .await?;
        let suspicious_patterns = detect_denial_bursts(&access_events, &self.suspicious);

        let data_freshness = self.analytical.freshness().await?;

        info!(
            total_events,
            access_denied_count,
            suspicious = suspicious_patterns.len(),
            "generated HIPAA audit report"
        );

        Ok(HipaaAuditReport {
            period_start,
            period_end,
            total_events,
            events_by_type,
            access_granted_count,
            access_denied_count,
            suspicious_patterns,
            retention_years: HIPAA_RETENTION_YEARS,
            data_freshness,
            generated_at: Utc::now(),
        })
    }

    /// Build a GDPR subject access report for one user.
    pub async fn generate_gdpr_access_report(
        &self,
        user_id: UserId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<GdprAccessReport> {
        let events = self
            .analytical
            .events_for_user(user_id.clone(), period_start, period_end)
            .await?;

        let mut events_by_type: BTreeMap<String, u64> = BTreeMap::new();
        for event in &events {
            *events_by_type
                .entry(event.event_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        let data_freshness = self.analytical.freshness().await?;

        Ok(GdprAccessReport {
            user_id,
            period_start,
            period_end,
            total_events: events.len() as u64,
            events_by_type,
            events,
            data_freshness,
            generated_at: Utc::now(),
        })
    }
}

/// Earliest timestamp the retention policy guarantees to be queryable.
pub fn retention_floor(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_year(now.year() - HIPAA_RETENTION_YEARS).unwrap_or(now)
}

/// Sliding-window scan for repeated denials per principal.
fn detect_denial_bursts(
    access_events: &[LedgerEvent],
    config: &SuspiciousPatternConfig,
) -> Vec<SuspiciousPattern> {
    use crate::domain::EventType;

    let mut denials_by_user: BTreeMap<Option<String>, Vec<DateTime<Utc>>> = BTreeMap::new();
    for event in access_events {
        if event.event_type == EventType::AccessDenied {
            denials_by_user
                .entry(event.user_id.as_ref().map(|u| u.as_str().to_string()))
                .or_default()
                .push(event.timestamp);
        }
    }

    let window = chrono::Duration::from_std(config.window).unwrap_or(chrono::Duration::zero());
    let mut patterns = Vec::new();

    for (user, mut timestamps) in denials_by_user {
        timestamps.sort();
        let mut lo = 0usize;
        let mut best: Option<(usize, usize)> = None;

        for hi in 0..timestamps.len() {
            while timestamps[hi] - timestamps[lo] > window {
                lo += 1;
            }
            let count = hi - lo + 1;
            if count >= config.threshold
                && best.map_or(true, |(b_lo, b_hi)| count > b_hi - b_lo + 1)
            {
                best = Some((lo, hi));
            }
        }

        if let Some((lo, hi)) = best {
            patterns.push(SuspiciousPattern {
                user_id: user.map(UserId::new),
                denied_count: hi - lo + 1,
                window_start: timestamps[lo],
                window_end: timestamps[hi],
            });
        }
    }

    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventType, LedgerEvent};
    use crate::infra::{MemoryAnalyticalStore, MemoryDurableStore, MemoryRealtimeStore};

    fn denied_at(user: &str, ts: DateTime<Utc>) -> LedgerEvent {
        let mut event =
            LedgerEvent::access_denied(UserId::from(user), "/records/1", "no consent", None);
        event.timestamp = ts;
        event
    }

    #[test]
    fn test_denial_burst_detected() {
        let base = Utc::now();
        let events: Vec<LedgerEvent> = (0..4)
            .map(|i| denied_at("u-1", base + chrono::Duration::seconds(i * 30)))
            .collect();

        let patterns = detect_denial_bursts(&events, &SuspiciousPatternConfig::default());
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].denied_count, 4);
        assert_eq!(patterns[0].user_id.as_ref().unwrap().as_str(), "u-1");
    }

    #[test]
    fn test_spread_out_denials_are_not_suspicious() {
        let base = Utc::now();
        let events: Vec<LedgerEvent> = (0..4)
            .map(|i| denied_at("u-1", base + chrono::Duration::minutes(i * 10)))
            .collect();

        let patterns = detect_denial_bursts(&events, &SuspiciousPatternConfig::default());
        assert!(patterns.is_empty());
    }

    #[test]
    fn test_bursts_attributed_per_user() {
        let base = Utc::now();
        let mut events: Vec<LedgerEvent> = (0..3)
            .map(|i| denied_at("u-1", base + chrono::Duration::seconds(i * 10)))
            .collect();
        // A single denial for another user is below threshold
        events.push(denied_at("u-2", base));

        let patterns = detect_denial_bursts(&events, &SuspiciousPatternConfig::default());
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].user_id.as_ref().unwrap().as_str(), "u-1");
    }

    #[test]
    fn test_retention_floor() {
        let now = Utc::now();
        let floor = retention_floor(now);
        assert_eq!(floor.year(), now.year() - HIPAA_RETENTION_YEARS);
    }

    #[tokio::test]
    async fn test_hipaa_report_counts_and_freshness() {
        let analytical = MemoryAnalyticalStore::shared();
        let service = QueryService::new(
            MemoryDurableStore::shared(),
            MemoryRealtimeStore::shared(),
            analytical.clone(),
        );

        let granted = LedgerEvent::access_granted(UserId::from("u-1"), "/records/1", None);
        analytical.insert(&granted).await.unwrap();
        analytical
            .insert(&LedgerEvent::new(EventType::MlInference))
            .await
            .unwrap();

        let now = Utc::now();
        let report = service
            .generate_hipaa_audit_report(now - chrono::Duration::hours(1), now + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(report.total_events, 2);
        assert_eq!(report.access_granted_count, 1);
        assert_eq!(report.access_denied_count, 0);
        assert!(report.suspicious_patterns.is_empty());
        assert_eq!(report.retention_years, HIPAA_RETENTION_YEARS);
        assert!(report.data_freshness.is_some());
    }

    #[tokio::test]
    async fn test_gdpr_report_scoped_to_user() {
        let analytical = MemoryAnalyticalStore::shared();
        let service = QueryService::new(
            MemoryDurableStore::shared(),
            MemoryRealtimeStore::shared(),
            analytical.clone(),
        );

        analytical
            .insert(&LedgerEvent::auth_success(UserId::from("u-1"), "password", None))
            .await
            .unwrap();
        analytical
            .insert(&LedgerEvent::auth_success(UserId::from("u-2"), "password", None))
            .await
            .unwrap();

        let now = Utc::now();
        let report = service
            .generate_gdpr_access_report(
                UserId::from("u-1"),
                now - chrono::Duration::hours(1),
                now + chrono::Duration::hours(1),
            )
            .await
            .unwrap();

        assert_eq!(report.total_events, 1);
        assert_eq!(report.events[0].user_id.as_ref().unwrap().as_str(), "u-1");
        assert_eq!(report.events_by_type.get("auth.success"), Some(&1));
    }
}
