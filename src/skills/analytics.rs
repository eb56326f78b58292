//! Analytics skills: cost optimization and the full-report orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::Error;
use crate::formula;
use crate::skills::{Progress, Skill, SkillContext, SkillResult};

// ── Cost optimizer ──────────────────────────────────────────────────

/// Pure-computation skill: applies the unit-economics formulas to invoice and
/// haul history and flags savings opportunities.
pub struct CostOptimizerSkill;

impl CostOptimizerSkill {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CostOptimizerSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for CostOptimizerSkill {
    fn name(&self) -> &str {
        "cost-optimizer"
    }

    fn description(&self) -> &str {
        "Computes unit economics and flags savings opportunities"
    }

    async fn execute(
        &self,
        context: &SkillContext,
        progress: &Progress,
    ) -> Result<SkillResult, Error> {
        if context.invoices.is_empty() {
            return Ok(SkillResult::fail("no invoices to analyze"));
        }

        let project = &context.project;
        let months = Decimal::from(context.invoices.len());

        progress.report(20, Some("Computing spend metrics"));

        let total: Decimal = context.invoices.iter().map(|i| i.total_amount).sum();
        let contamination: Decimal = context
            .invoices
            .iter()
            .map(|i| i.contamination_charges)
            .sum();
        let bulk: Decimal = context.invoices.iter().map(|i| i.bulk_charges).sum();

        let monthly_total = total / months;
        let monthly_bulk = bulk / months;
        let cost_per_door = formula::cost_per_door(monthly_total, project.units)?;

        progress.report(50, Some("Computing haul metrics"));

        let service = formula::ServiceType::parse(&project.equipment_type)?;
        let haul_metrics = compute_haul_metrics(context, service)?;

        progress.report(80, Some("Evaluating recommendations"));

        let mut recommendations = Vec::new();
        if let Some(m) = &haul_metrics
            && formula::recommend_compactor_monitoring(m.avg_tons_per_haul, m.max_days_between)
        {
            recommendations.push(json!({
                "kind": "compactor_monitoring",
                "detail": format!(
                    "Hauls average {} tons every {} days; fullness monitoring would cut haul frequency",
                    m.avg_tons_per_haul.round_dp(2),
                    m.avg_days_between.round_dp(1),
                ),
            }));
        }
        if formula::recommend_contamination_reduction(contamination, total) {
            recommendations.push(json!({
                "kind": "contamination_reduction",
                "detail": format!(
                    "Contamination charges are {}% of total spend",
                    (contamination * Decimal::ONE_HUNDRED / total).round_dp(1),
                ),
            }));
        }
        if formula::recommend_bulk_subscription(monthly_bulk) {
            recommendations.push(json!({
                "kind": "bulk_subscription",
                "detail": format!(
                    "Ad-hoc bulk charges average ${} per month",
                    monthly_bulk.round_dp(2),
                ),
            }));
        }

        progress.report(100, Some("Optimization complete"));
        info!(
            project_id = %context.project_id,
            recommendations = recommendations.len(),
            "Cost optimization computed"
        );

        Ok(SkillResult::ok(json!({
            "monthly_total": monthly_total.round_dp(2),
            "cost_per_door": cost_per_door.round_dp(2),
            "contamination_charges_monthly": (contamination / months).round_dp(2),
            "bulk_charges_monthly": monthly_bulk.round_dp(2),
            "haul_metrics": haul_metrics.map(|m| json!({
                "avg_tons_per_haul": m.avg_tons_per_haul.round_dp(2),
                "avg_days_between_hauls": m.avg_days_between.round_dp(1),
                "max_days_between_hauls": m.max_days_between,
                "yards_per_door": m.yards_per_door.round_dp(3),
            })),
            "recommendations": recommendations,
        })))
    }
}

struct HaulMetrics {
    avg_tons_per_haul: Decimal,
    avg_days_between: Decimal,
    /// Longest gap between consecutive hauls; gates the monitoring
    /// recommendation.
    max_days_between: Decimal,
    /// Monthly loose-yardage equivalent per unit.
    yards_per_door: Decimal,
}

/// Haul-based metrics apply to compactor service only; dumpster schedules are
/// not logged per haul.
fn compute_haul_metrics(
    context: &SkillContext,
    service: formula::ServiceType,
) -> Result<Option<HaulMetrics>, Error> {
    if service != formula::ServiceType::Compactor || context.haul_logs.len() < 2 {
        return Ok(None);
    }

    let logs = &context.haul_logs;
    let total_tons: Decimal = logs.iter().map(|l| l.tons).sum();
    let avg_tons_per_haul = formula::tons_per_haul(total_tons, logs.len() as u32)?;

    // Logs arrive sorted by haul_date ascending.
    let span_days = (logs[logs.len() - 1].haul_date - logs[0].haul_date).num_days();
    let intervals = (logs.len() - 1) as i64;
    let avg_days_between = if span_days <= 0 {
        Decimal::ZERO
    } else {
        Decimal::from(span_days) / Decimal::from(intervals)
    };
    let max_days_between = logs
        .windows(2)
        .map(|pair| (pair[1].haul_date - pair[0].haul_date).num_days().max(0))
        .max()
        .map(Decimal::from)
        .unwrap_or(Decimal::ZERO);

    // Monthly tonnage over the logged span, converted to loose yards per door.
    let span_months = if span_days > 0 {
        Decimal::from(span_days) / Decimal::from(30)
    } else {
        Decimal::ONE
    };
    let monthly_tons = total_tons / span_months;
    let yards_per_door =
        formula::yards_per_door_compacted(monthly_tons, context.project.units)?;

    Ok(Some(HaulMetrics {
        avg_tons_per_haul,
        avg_days_between,
        max_days_between,
        yards_per_door,
    }))
}

// ── Full-report orchestrator ────────────────────────────────────────

/// Runs the full analysis pipeline: extraction, regulatory research, contract
/// review, then cost optimization, and folds the pieces into one report.
///
/// Sub-skill results with `success: false` become null sections in the
/// report; only a returned error aborts the run.
pub struct WastewiseAnalyticsSkill {
    extractor: Arc<dyn Skill>,
    regulatory: Arc<dyn Skill>,
    contracts: Arc<dyn Skill>,
    optimizer: Arc<dyn Skill>,
}

impl WastewiseAnalyticsSkill {
    pub fn new(
        extractor: Arc<dyn Skill>,
        regulatory: Arc<dyn Skill>,
        contracts: Arc<dyn Skill>,
        optimizer: Arc<dyn Skill>,
    ) -> Self {
        Self {
            extractor,
            regulatory,
            contracts,
            optimizer,
        }
    }

    async fn run_phase(
        &self,
        skill: &Arc<dyn Skill>,
        context: &SkillContext,
        progress: &Progress,
        base: u8,
        span: u8,
        gaps: &mut Vec<String>,
    ) -> Result<Value, Error> {
        progress.report(base, Some(skill.description()));

        // Sub-skills get a phase-local reporter mapped into [base, base+span].
        let phase_progress = scaled_progress(progress, base, span);
        let result = skill.execute(context, &phase_progress).await?;

        if result.success {
            Ok(result.data)
        } else {
            let reason = result
                .error
                .unwrap_or_else(|| "no result".to_string());
            warn!(skill = skill.name(), "Report section unavailable: {reason}");
            gaps.push(format!("{}: {reason}", skill.name()));
            Ok(Value::Null)
        }
    }
}

fn scaled_progress(outer: &Progress, base: u8, span: u8) -> Progress {
    let sink = outer.sink_handle();
    Progress::new(Arc::new(move |pct, step| {
        let scaled = base.saturating_add((pct.min(100) as u16 * span as u16 / 100) as u8);
        sink(scaled, step);
    }))
}

#[async_trait]
impl Skill for WastewiseAnalyticsSkill {
    fn name(&self) -> &str {
        "wastewise-analytics"
    }

    fn description(&self) -> &str {
        "Runs the full waste-spend analysis and assembles the report"
    }

    async fn execute(
        &self,
        context: &SkillContext,
        progress: &Progress,
    ) -> Result<SkillResult, Error> {
        let mut gaps = Vec::new();

        let extraction = self
            .run_phase(&self.extractor, context, progress, 0, 25, &mut gaps)
            .await?;
        let regulatory = self
            .run_phase(&self.regulatory, context, progress, 25, 25, &mut gaps)
            .await?;
        let contracts = self
            .run_phase(&self.contracts, context, progress, 50, 25, &mut gaps)
            .await?;
        let optimization = self
            .run_phase(&self.optimizer, context, progress, 75, 24, &mut gaps)
            .await?;

        progress.report(100, Some("Report assembled"));

        Ok(SkillResult::ok(json!({
            "generated_at": Utc::now().to_rfc3339(),
            "property": {
                "name": context.project.property_name,
                "units": context.project.units,
                "city": context.project.city,
                "state": context.project.state,
            },
            "extraction": extraction,
            "regulatory": regulatory,
            "contracts": contracts,
            "optimization": optimization,
            "gaps": gaps,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::test_support::{StaticSkill, sample_context};
    use crate::store::{HaulLog, Invoice};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn invoice(project_id: Uuid, total: Decimal, contamination: Decimal, bulk: Decimal) -> Invoice {
        Invoice {
            id: Uuid::new_v4(),
            project_id,
            hauler: "Acme Disposal".into(),
            period: "2026-07".into(),
            raw_text: String::new(),
            total_amount: total,
            contamination_charges: contamination,
            bulk_charges: bulk,
            extracted: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn optimizer_computes_cost_per_door() {
        let mut context = sample_context();
        context.invoices = vec![invoice(
            context.project_id,
            dec!(2450.00),
            Decimal::ZERO,
            Decimal::ZERO,
        )];

        let result = CostOptimizerSkill::new()
            .execute(&context, &Progress::noop())
            .await
            .unwrap();
        assert!(result.success);
        let cost: Decimal = result.data["cost_per_door"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(cost, dec!(12.25));
        assert_eq!(result.data["recommendations"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn optimizer_flags_contamination_and_bulk() {
        let mut context = sample_context();
        // 150/2000 = 7.5% contamination; 600 bulk per month.
        context.invoices = vec![invoice(
            context.project_id,
            dec!(2000),
            dec!(150),
            dec!(600),
        )];

        let result = CostOptimizerSkill::new()
            .execute(&context, &Progress::noop())
            .await
            .unwrap();
        let kinds: Vec<&str> = result.data["recommendations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["kind"].as_str().unwrap())
            .collect();
        assert!(kinds.contains(&"contamination_reduction"));
        assert!(kinds.contains(&"bulk_subscription"));
    }

    #[tokio::test]
    async fn optimizer_flags_light_frequent_hauls() {
        let mut context = sample_context();
        context.invoices = vec![invoice(
            context.project_id,
            dec!(2000),
            Decimal::ZERO,
            Decimal::ZERO,
        )];
        // Four hauls a week apart, 4 tons each: light and frequent.
        let start = Utc::now() - Duration::days(21);
        context.haul_logs = (0..4)
            .map(|i| HaulLog {
                id: Uuid::new_v4(),
                project_id: context.project_id,
                haul_date: start + Duration::days(7 * i),
                tons: dec!(4),
            })
            .collect();

        let result = CostOptimizerSkill::new()
            .execute(&context, &Progress::noop())
            .await
            .unwrap();
        let kinds: Vec<&str> = result.data["recommendations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["kind"].as_str().unwrap())
            .collect();
        assert!(kinds.contains(&"compactor_monitoring"));
        let tons: Decimal = result.data["haul_metrics"]["avg_tons_per_haul"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(tons, dec!(4));
    }

    #[tokio::test]
    async fn optimizer_without_invoices_is_recoverable() {
        let context = sample_context();
        let result = CostOptimizerSkill::new()
            .execute(&context, &Progress::noop())
            .await
            .unwrap();
        assert!(!result.success);
    }

    fn static_skill(name: &'static str, result: SkillResult) -> Arc<dyn Skill> {
        Arc::new(StaticSkill {
            skill_name: name,
            result,
        })
    }

    #[tokio::test]
    async fn orchestrator_folds_failed_sections_as_null() {
        let context = sample_context();
        let skill = WastewiseAnalyticsSkill::new(
            static_skill("batch-extractor", SkillResult::ok(json!({"extracted": 3}))),
            static_skill(
                "regulatory-research",
                SkillResult::fail("no ordinances found for Austin, TX"),
            ),
            static_skill("contract-analyzer", SkillResult::ok(json!({"contracts": []}))),
            static_skill("cost-optimizer", SkillResult::ok(json!({"cost_per_door": "12.25"}))),
        );

        let result = skill.execute(&context, &Progress::noop()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data["extraction"]["extracted"], 3);
        assert!(result.data["regulatory"].is_null());
        let gaps = result.data["gaps"].as_array().unwrap();
        assert_eq!(gaps.len(), 1);
        assert!(gaps[0].as_str().unwrap().starts_with("regulatory-research:"));
    }

    #[tokio::test]
    async fn orchestrator_progress_is_monotone_across_phases() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            Arc::new(move |pct: u8, _step: Option<&str>| {
                seen.lock().unwrap().push(pct);
            })
        };
        let progress = Progress::new(sink);

        let context = sample_context();
        let ok = SkillResult::ok(json!({}));
        let skill = WastewiseAnalyticsSkill::new(
            static_skill("batch-extractor", ok.clone()),
            static_skill("regulatory-research", ok.clone()),
            static_skill("contract-analyzer", ok.clone()),
            static_skill("cost-optimizer", ok),
        );

        skill.execute(&context, &progress).await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "saw {seen:?}");
        assert_eq!(*seen.last().unwrap(), 100);
    }
}
