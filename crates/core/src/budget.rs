//! Token/cost budget enforcement.
//!
//! Every completion call in the pipeline is bracketed by
//! [`BudgetGuard::authorize`] and [`BudgetGuard::settle`]: authorization
//! reserves the estimated cost against the daily, monthly, and per-stage
//! windows before the request is issued, and settlement replaces the
//! reservation with the actual cost and appends a [`UsageRecord`] to the
//! ledger. The guard is the only state shared across concurrent tasks, so
//! the reserve-then-settle sequence runs under a single async mutex: two
//! concurrent callers can never jointly overshoot a limit.

use crate::error::BudgetDenial;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Mutex;
use tracing::debug;

/// Which pipeline stage issued a completion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Planning,
    Generation,
    Validation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Planning => "planning",
            Stage::Generation => "generation",
            Stage::Validation => "validation",
        };
        f.write_str(s)
    }
}

/// Per-model token pricing, in USD per 1000 tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Pricing {
    /// Lookup by model identifier, defaulting to the mid-tier rate.
    pub fn for_model(model: &str) -> Self {
        match model {
            "gpt-4" => Pricing { input_per_1k: 0.03, output_per_1k: 0.06 },
            "gpt-3.5-turbo" => Pricing { input_per_1k: 0.001, output_per_1k: 0.002 },
            _ => Pricing { input_per_1k: 0.01, output_per_1k: 0.03 },
        }
    }

    pub fn cost(&self, tokens_in: u32, tokens_out: u32) -> f64 {
        (f64::from(tokens_in) * self.input_per_1k + f64::from(tokens_out) * self.output_per_1k)
            / 1000.0
    }
}

/// Static budget configuration, supplied at startup and not hot-reloaded.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub daily_limit_usd: f64,
    pub monthly_limit_usd: f64,
    /// Optional sub-limits per pipeline stage, within the same windows.
    pub stage_limits_usd: HashMap<Stage, f64>,
    pub pricing: Pricing,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit_usd: 5.0,
            monthly_limit_usd: 50.0,
            stage_limits_usd: HashMap::new(),
            pricing: Pricing::for_model("gpt-4-turbo"),
        }
    }
}

/// One appended ledger entry. Never mutated, only appended and summed.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub cost: f64,
    pub stage: Stage,
}

/// Proof of a successful authorization. Must be settled with actual usage or
/// cancelled when the call produced none.
#[derive(Debug)]
pub struct Grant {
    id: u64,
    stage: Stage,
}

/// Point-in-time readout of the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub today_usd: f64,
    pub month_usd: f64,
    pub remaining_today_usd: f64,
    pub remaining_month_usd: f64,
    pub total_usd: f64,
    pub calls: usize,
}

#[derive(Debug, Default)]
struct LedgerState {
    next_grant_id: u64,
    reservations: HashMap<u64, (Stage, f64)>,
    records: Vec<UsageRecord>,
    spent_daily: HashMap<String, f64>,
    spent_monthly: HashMap<String, f64>,
    spent_per_stage: HashMap<Stage, f64>,
}

impl LedgerState {
    fn reserved_total(&self) -> f64 {
        self.reservations.values().map(|(_, cost)| cost).sum()
    }

    fn reserved_for_stage(&self, stage: Stage) -> f64 {
        self.reservations
            .values()
            .filter(|(s, _)| *s == stage)
            .map(|(_, cost)| cost)
            .sum()
    }
}

fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Tracks cumulative spend against configured limits and authorizes each
/// completion call before it is issued.
pub struct BudgetGuard {
    config: BudgetConfig,
    state: Mutex<LedgerState>,
}

impl BudgetGuard {
    pub fn new(config: BudgetConfig) -> Self {
        Self { config, state: Mutex::new(LedgerState::default()) }
    }

    /// Crude upper-bound token estimate for a prompt plus its completion
    /// allowance: roughly four characters per prompt token.
    pub fn estimate_tokens(prompt: &str, max_tokens: u32) -> u32 {
        (prompt.len() / 4) as u32 + max_tokens
    }

    /// Reserve the estimated cost of a call, or refuse it.
    ///
    /// The estimate is split 40/60 between input and output tokens for
    /// pricing. A request that would push spent-plus-reserved past the
    /// daily, monthly, or stage limit is rejected before issuance.
    pub async fn authorize(&self, stage: Stage, estimated_tokens: u32) -> Result<Grant, BudgetDenial> {
        let est_in = (f64::from(estimated_tokens) * 0.4) as u32;
        let est_out = (f64::from(estimated_tokens) * 0.6) as u32;
        let estimated_cost = self.config.pricing.cost(est_in, est_out);

        let now = Utc::now();
        let mut state = self.state.lock().await;

        let spent_today = state.spent_daily.get(&day_key(now)).copied().unwrap_or(0.0);
        let spent_month = state.spent_monthly.get(&month_key(now)).copied().unwrap_or(0.0);
        let reserved = state.reserved_total();

        if spent_today + reserved + estimated_cost > self.config.daily_limit_usd {
            return Err(BudgetDenial {
                stage,
                reason: format!(
                    "daily limit {:.2} USD would be exceeded ({:.4} spent, {:.4} reserved, {:.4} requested)",
                    self.config.daily_limit_usd, spent_today, reserved, estimated_cost
                ),
            });
        }
        if spent_month + reserved + estimated_cost > self.config.monthly_limit_usd {
            return Err(BudgetDenial {
                stage,
                reason: format!(
                    "monthly limit {:.2} USD would be exceeded ({:.4} spent, {:.4} reserved, {:.4} requested)",
                    self.config.monthly_limit_usd, spent_month, reserved, estimated_cost
                ),
            });
        }
        if let Some(stage_limit) = self.config.stage_limits_usd.get(&stage) {
            let stage_spent = state.spent_per_stage.get(&stage).copied().unwrap_or(0.0);
            let stage_reserved = state.reserved_for_stage(stage);
            if stage_spent + stage_reserved + estimated_cost > *stage_limit {
                return Err(BudgetDenial {
                    stage,
                    reason: format!("{stage} stage limit {stage_limit:.2} USD would be exceeded"),
                });
            }
        }

        state.next_grant_id += 1;
        let id = state.next_grant_id;
        state.reservations.insert(id, (stage, estimated_cost));
        debug!(%stage, estimated_tokens, estimated_cost, "budget authorized");
        Ok(Grant { id, stage })
    }

    /// Replace a reservation with the actual usage and append it to the
    /// ledger.
    pub async fn settle(&self, grant: Grant, tokens_in: u32, tokens_out: u32) -> UsageRecord {
        let now = Utc::now();
        let cost = self.config.pricing.cost(tokens_in, tokens_out);
        let record = UsageRecord { timestamp: now, tokens_in, tokens_out, cost, stage: grant.stage };

        let mut state = self.state.lock().await;
        state.reservations.remove(&grant.id);
        *state.spent_daily.entry(day_key(now)).or_insert(0.0) += cost;
        *state.spent_monthly.entry(month_key(now)).or_insert(0.0) += cost;
        *state.spent_per_stage.entry(grant.stage).or_insert(0.0) += cost;
        state.records.push(record.clone());
        debug!(stage = %record.stage, tokens_in, tokens_out, cost, "budget settled");
        record
    }

    /// Release a reservation whose call never produced usage.
    pub async fn cancel(&self, grant: Grant) {
        let mut state = self.state.lock().await;
        state.reservations.remove(&grant.id);
    }

    /// Sum of all settled costs.
    pub async fn total_spent(&self) -> f64 {
        let state = self.state.lock().await;
        state.records.iter().map(|r| r.cost).sum()
    }

    /// A copy of the append-only ledger.
    pub async fn records(&self) -> Vec<UsageRecord> {
        self.state.lock().await.records.clone()
    }

    /// Spend and headroom for the current windows.
    pub async fn usage_summary(&self) -> UsageSummary {
        let now = Utc::now();
        let state = self.state.lock().await;
        let today = state.spent_daily.get(&day_key(now)).copied().unwrap_or(0.0);
        let month = state.spent_monthly.get(&month_key(now)).copied().unwrap_or(0.0);
        UsageSummary {
            today_usd: today,
            month_usd: month,
            remaining_today_usd: (self.config.daily_limit_usd - today).max(0.0),
            remaining_month_usd: (self.config.monthly_limit_usd - month).max(0.0),
            total_usd: state.records.iter().map(|r| r.cost).sum(),
            calls: state.records.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn flat_pricing() -> Pricing {
        // 1 USD per 1k tokens on both sides keeps arithmetic legible.
        Pricing { input_per_1k: 1.0, output_per_1k: 1.0 }
    }

    fn config(daily: f64) -> BudgetConfig {
        BudgetConfig {
            daily_limit_usd: daily,
            monthly_limit_usd: daily * 10.0,
            stage_limits_usd: HashMap::new(),
            pricing: flat_pricing(),
        }
    }

    #[test]
    fn pricing_table_matches_models() {
        assert_eq!(Pricing::for_model("gpt-4").input_per_1k, 0.03);
        assert_eq!(Pricing::for_model("gpt-3.5-turbo").output_per_1k, 0.002);
        assert_eq!(Pricing::for_model("anything-else").input_per_1k, 0.01);
    }

    #[test]
    fn estimate_covers_prompt_and_completion() {
        // 400 chars ~= 100 prompt tokens, plus the full completion allowance.
        let prompt = "x".repeat(400);
        assert_eq!(BudgetGuard::estimate_tokens(&prompt, 500), 600);
    }

    #[tokio::test]
    async fn settle_appends_to_the_ledger() {
        let guard = BudgetGuard::new(config(100.0));
        let grant = guard.authorize(Stage::Planning, 1000).await.unwrap();
        guard.settle(grant, 400, 600).await;
        let records = guard.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stage, Stage::Planning);
        assert!((records[0].cost - 1.0).abs() < 1e-9);
        assert!((guard.total_spent().await - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn denies_when_limit_would_be_crossed() {
        // 1000 estimated tokens cost 1.0 at flat pricing.
        let guard = BudgetGuard::new(config(2.5));
        let a = guard.authorize(Stage::Generation, 1000).await.unwrap();
        let b = guard.authorize(Stage::Generation, 1000).await.unwrap();
        let denied = guard.authorize(Stage::Generation, 1000).await;
        assert!(denied.is_err());
        guard.settle(a, 400, 600).await;
        guard.cancel(b).await;
        // Cancelling released the reservation, so there is headroom again.
        assert!(guard.authorize(Stage::Generation, 1000).await.is_ok());
    }

    #[tokio::test]
    async fn stage_sub_limit_is_enforced_independently() {
        let mut cfg = config(100.0);
        cfg.stage_limits_usd.insert(Stage::Validation, 1.0);
        let guard = BudgetGuard::new(cfg);
        let grant = guard.authorize(Stage::Validation, 900).await.unwrap();
        guard.settle(grant, 360, 540).await;
        let denied = guard.authorize(Stage::Validation, 900).await;
        assert!(denied.is_err());
        // Other stages still have the global headroom.
        assert!(guard.authorize(Stage::Generation, 900).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_authorizations_never_jointly_overshoot() {
        // Limit admits at most 5 reservations of 1.0 each.
        let guard = Arc::new(BudgetGuard::new(config(5.0)));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let guard = Arc::clone(&guard);
            handles.push(tokio::spawn(async move {
                match guard.authorize(Stage::Generation, 1000).await {
                    Ok(grant) => {
                        guard.settle(grant, 400, 600).await;
                        true
                    }
                    Err(_) => false,
                }
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
        let total = guard.total_spent().await;
        assert!(total <= 5.0 + 1e-9, "total spent {total} exceeded the limit");
    }

    #[tokio::test]
    async fn summary_reports_spend_and_headroom() {
        let guard = BudgetGuard::new(config(10.0));
        let grant = guard.authorize(Stage::Planning, 2000).await.unwrap();
        guard.settle(grant, 800, 1200).await;
        let summary = guard.usage_summary().await;
        assert_eq!(summary.calls, 1);
        assert!((summary.today_usd - 2.0).abs() < 1e-9);
        assert!((summary.remaining_today_usd - 8.0).abs() < 1e-9);
    }
}
