use std::sync::{Arc, RwLock};

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::db::repository::{JobStore, StoreError};

/// Alert thresholds as fractions of the relevant cap.
const WARNING_THRESHOLD: f64 = 0.75;
const CRITICAL_THRESHOLD: f64 = 0.90;

/// Daily/monthly spend ceilings, scoped per user and globally. Runtime
/// configuration, adjustable through [`CostMonitor::set_caps`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpendingCaps {
    pub user_daily: f64,
    pub user_monthly: f64,
    pub global_daily: f64,
    pub global_monthly: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertScope {
    User,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertMetric {
    Daily,
    Monthly,
}

/// Threshold crossing produced by a budget check. Ephemeral; persistence and
/// notification live outside the core.
#[derive(Debug, Clone, Serialize)]
pub struct CostAlert {
    pub scope: AlertScope,
    pub severity: AlertSeverity,
    pub metric: AlertMetric,
    pub current: f64,
    pub threshold: f64,
    pub cap: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a budget check.
#[derive(Debug, Clone)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub alerts: Vec<CostAlert>,
}

/// Enforces spend caps before an extraction is allowed, reading freshly
/// aggregated sums on every call. Best-effort: near-simultaneous submissions
/// can each pass a check that combined would exceed a cap.
pub struct CostMonitor {
    store: Arc<dyn JobStore>,
    caps: RwLock<SpendingCaps>,
}

impl CostMonitor {
    pub fn new(store: Arc<dyn JobStore>, caps: SpendingCaps) -> Self {
        Self {
            store,
            caps: RwLock::new(caps),
        }
    }

    pub fn caps(&self) -> SpendingCaps {
        *self.caps.read().unwrap()
    }

    /// Administrative cap adjustment; takes effect on the next check.
    pub fn set_caps(&self, caps: SpendingCaps) {
        *self.caps.write().unwrap() = caps;
    }

    pub async fn check_user_budget(
        &self,
        user_id: &str,
        estimated_cost: f64,
    ) -> Result<BudgetDecision, StoreError> {
        let caps = self.caps();
        let daily = self
            .store
            .completed_cost_since(Some(user_id), start_of_today())
            .await?;
        let monthly = self
            .store
            .completed_cost_since(Some(user_id), start_of_month())
            .await?;

        Ok(evaluate(
            AlertScope::User,
            daily,
            monthly,
            caps.user_daily,
            caps.user_monthly,
            estimated_cost,
        ))
    }

    pub async fn check_global_budget(
        &self,
        estimated_cost: f64,
    ) -> Result<BudgetDecision, StoreError> {
        let caps = self.caps();
        let daily = self
            .store
            .completed_cost_since(None, start_of_today())
            .await?;
        let monthly = self
            .store
            .completed_cost_since(None, start_of_month())
            .await?;

        Ok(evaluate(
            AlertScope::Global,
            daily,
            monthly,
            caps.global_daily,
            caps.global_monthly,
            estimated_cost,
        ))
    }

    /// Gate an extraction: user budget first, then global, short-circuiting
    /// on the first denial. On success the alerts of both checks merge.
    pub async fn can_perform_extraction(
        &self,
        user_id: &str,
        estimated_cost: f64,
    ) -> Result<BudgetDecision, StoreError> {
        let mut user_decision = self.check_user_budget(user_id, estimated_cost).await?;
        if !user_decision.allowed {
            return Ok(user_decision);
        }

        let global_decision = self.check_global_budget(estimated_cost).await?;
        if !global_decision.allowed {
            return Ok(global_decision);
        }

        user_decision.alerts.extend(global_decision.alerts);
        Ok(user_decision)
    }

    /// Log every alert; critical alerts take the distinguished path wired to
    /// paging integrations.
    pub fn process_alerts(&self, alerts: &[CostAlert]) {
        for alert in alerts {
            match alert.severity {
                AlertSeverity::Critical => {
                    tracing::error!(
                        scope = %alert.scope,
                        metric = %alert.metric,
                        current = alert.current,
                        cap = alert.cap,
                        "CRITICAL spend alert: {}",
                        alert.message
                    );
                    metrics::counter!("extraction_cost_alerts_critical").increment(1);
                }
                AlertSeverity::Warning => {
                    tracing::warn!(
                        scope = %alert.scope,
                        metric = %alert.metric,
                        current = alert.current,
                        cap = alert.cap,
                        "Spend alert: {}",
                        alert.message
                    );
                    metrics::counter!("extraction_cost_alerts_warning").increment(1);
                }
            }
        }
    }
}

fn evaluate(
    scope: AlertScope,
    daily_spend: f64,
    monthly_spend: f64,
    daily_cap: f64,
    monthly_cap: f64,
    estimated_cost: f64,
) -> BudgetDecision {
    let scope_word = match scope {
        AlertScope::User => "your account",
        AlertScope::Global => "the service",
    };

    if daily_spend + estimated_cost > daily_cap {
        return BudgetDecision {
            allowed: false,
            reason: Some(format!(
                "Daily spending cap reached for {scope_word} (${daily_spend:.2} of ${daily_cap:.2})"
            )),
            alerts: Vec::new(),
        };
    }
    if monthly_spend + estimated_cost > monthly_cap {
        return BudgetDecision {
            allowed: false,
            reason: Some(format!(
                "Monthly spending cap reached for {scope_word} (${monthly_spend:.2} of ${monthly_cap:.2})"
            )),
            alerts: Vec::new(),
        };
    }

    let mut alerts = Vec::new();
    for (metric, spend, cap) in [
        (AlertMetric::Daily, daily_spend, daily_cap),
        (AlertMetric::Monthly, monthly_spend, monthly_cap),
    ] {
        if let Some(alert) = threshold_alert(scope, metric, spend, cap) {
            alerts.push(alert);
        }
    }

    BudgetDecision {
        allowed: true,
        reason: None,
        alerts,
    }
}

fn threshold_alert(
    scope: AlertScope,
    metric: AlertMetric,
    spend: f64,
    cap: f64,
) -> Option<CostAlert> {
    if cap <= 0.0 {
        return None;
    }
    let ratio = spend / cap;
    let (severity, threshold) = if ratio >= CRITICAL_THRESHOLD {
        (AlertSeverity::Critical, CRITICAL_THRESHOLD)
    } else if ratio >= WARNING_THRESHOLD {
        (AlertSeverity::Warning, WARNING_THRESHOLD)
    } else {
        return None;
    };

    Some(CostAlert {
        scope,
        severity,
        metric,
        current: spend,
        threshold: threshold * cap,
        cap,
        message: format!(
            "{metric} spend for {scope} at {:.0}% of the ${cap:.2} cap (${spend:.2})",
            ratio * 100.0
        ),
        timestamp: Utc::now(),
    })
}

pub fn start_of_today() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .unwrap()
}

pub fn start_of_month() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::repository::CompletedUpdate;
    use crate::models::job::{ExtractionJob, SchemaVersion, TokenUsage};
    use crate::models::menu::{MenuCategory, MenuExtraction};

    fn caps() -> SpendingCaps {
        SpendingCaps {
            user_daily: 1.00,
            user_monthly: 20.00,
            global_daily: 50.00,
            global_monthly: 1000.00,
        }
    }

    /// Seed a completed job whose stored cost is exactly `cost`.
    async fn seed_spend(store: &MemoryStore, user_id: &str, cost: f64) {
        let job = ExtractionJob::new(user_id, "menus/x.jpg", "hash-x", SchemaVersion::V2, "p");
        store.insert_job(&job).await.unwrap();
        let mut usage = TokenUsage::from_counts(0, 0);
        usage.estimated_cost = cost;
        store
            .update_completed(
                job.id,
                &CompletedUpdate {
                    result: MenuExtraction {
                        categories: vec![MenuCategory {
                            name: "Mains".to_string(),
                            confidence: 0.9,
                            items: Vec::new(),
                            subcategories: Vec::new(),
                        }],
                        currency: "USD".to_string(),
                        uncertain_items: Vec::new(),
                        superfluous_text: Vec::new(),
                    },
                    processing_ms: 1000,
                    token_usage: usage,
                    overall_confidence: 0.9,
                    uncertain_items: Vec::new(),
                    superfluous_text: Vec::new(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_daily_cap_blocks_at_boundary() {
        let store = Arc::new(MemoryStore::new());
        seed_spend(&store, "user-1", 0.98).await;
        let monitor = CostMonitor::new(store, caps());

        let decision = monitor.check_user_budget("user-1", 0.03).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision
            .reason
            .as_deref()
            .unwrap()
            .contains("Daily spending cap reached"));
    }

    #[tokio::test]
    async fn test_warning_alert_below_cap() {
        let store = Arc::new(MemoryStore::new());
        seed_spend(&store, "user-1", 0.76).await;
        let monitor = CostMonitor::new(store, caps());

        let decision = monitor.check_user_budget("user-1", 0.03).await.unwrap();
        assert!(decision.allowed);
        let daily_alerts: Vec<_> = decision
            .alerts
            .iter()
            .filter(|a| a.metric == AlertMetric::Daily)
            .collect();
        assert_eq!(daily_alerts.len(), 1);
        assert_eq!(daily_alerts[0].severity, AlertSeverity::Warning);
    }

    #[tokio::test]
    async fn test_critical_alert_supersedes_warning() {
        let store = Arc::new(MemoryStore::new());
        seed_spend(&store, "user-1", 0.92).await;
        let monitor = CostMonitor::new(store, caps());

        let decision = monitor.check_user_budget("user-1", 0.01).await.unwrap();
        assert!(decision.allowed);
        let daily: Vec<_> = decision
            .alerts
            .iter()
            .filter(|a| a.metric == AlertMetric::Daily)
            .collect();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn test_user_check_short_circuits_global() {
        let store = Arc::new(MemoryStore::new());
        seed_spend(&store, "user-1", 0.99).await;
        let monitor = CostMonitor::new(store, caps());

        let decision = monitor
            .can_perform_extraction("user-1", 0.05)
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.as_deref().unwrap().contains("your account"));
    }

    #[tokio::test]
    async fn test_global_cap_applies_across_users() {
        let store = Arc::new(MemoryStore::new());
        // Many users, each under their own cap, together past the global one.
        for i in 0..60 {
            seed_spend(&store, &format!("user-{i}"), 0.90).await;
        }
        let monitor = CostMonitor::new(store, caps());

        let decision = monitor.can_perform_extraction("user-0", 0.01).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.as_deref().unwrap().contains("the service"));
    }

    #[tokio::test]
    async fn test_clean_budget_allows_without_alerts() {
        let store = Arc::new(MemoryStore::new());
        seed_spend(&store, "user-1", 0.10).await;
        let monitor = CostMonitor::new(store, caps());

        let decision = monitor
            .can_perform_extraction("user-1", 0.05)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert!(decision.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_caps_are_runtime_mutable() {
        let store = Arc::new(MemoryStore::new());
        seed_spend(&store, "user-1", 0.50).await;
        let monitor = CostMonitor::new(store, caps());

        assert!(monitor.check_user_budget("user-1", 0.01).await.unwrap().allowed);

        let mut tightened = caps();
        tightened.user_daily = 0.40;
        monitor.set_caps(tightened);

        assert!(!monitor.check_user_budget("user-1", 0.01).await.unwrap().allowed);
    }
}
