use serde::Serialize;

use super::thresholds::{score_band, Threshold, Unit, THRESHOLDS};
use super::MetricName;

// ─── Score ───────────────────────────────────────────────────────

/// Per-metric band scores (100 / 50 / 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricScores {
    pub fcp: u8,
    pub lcp: u8,
    pub fid: u8,
    pub cls: u8,
    pub ttfb: u8,
}

/// Latest core values plus their band scores and the overall 0–100 score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VitalsScore {
    pub fcp: f64,
    pub lcp: f64,
    pub fid: f64,
    pub cls: f64,
    pub ttfb: f64,
    pub scores: MetricScores,
    pub overall: f64,
}

impl VitalsScore {
    /// Build the score from a lookup of the latest value per metric.
    /// Metrics that were never captured count as 0, i.e. the good band.
    pub fn from_latest(latest: impl Fn(&MetricName) -> Option<f64>) -> Self {
        let value = |name: MetricName| latest(&name).unwrap_or(0.0);

        let fcp = value(MetricName::Fcp);
        let lcp = value(MetricName::Lcp);
        let fid = value(MetricName::Fid);
        let cls = value(MetricName::Cls);
        let ttfb = value(MetricName::Ttfb);

        let scores = MetricScores {
            fcp: score_band(&MetricName::Fcp, fcp),
            lcp: score_band(&MetricName::Lcp, lcp),
            fid: score_band(&MetricName::Fid, fid),
            cls: score_band(&MetricName::Cls, cls),
            ttfb: score_band(&MetricName::Ttfb, ttfb),
        };

        let bands = [scores.fcp, scores.lcp, scores.fid, scores.cls, scores.ttfb];
        let overall =
            bands.iter().map(|s| f64::from(*s)).sum::<f64>() / bands.len() as f64;

        Self {
            fcp,
            lcp,
            fid,
            cls,
            ttfb,
            scores,
            overall,
        }
    }
}

// ─── Budgets ─────────────────────────────────────────────────────

/// Which threshold bound a budget is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetKind {
    Good,
    Poor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceBudget {
    pub metric: MetricName,
    pub budget: f64,
    pub unit: Unit,
    #[serde(rename = "type")]
    pub kind: BudgetKind,
}

impl PerformanceBudget {
    pub fn from_threshold(threshold: &Threshold, kind: BudgetKind) -> Self {
        Self {
            metric: threshold.metric.clone(),
            budget: match kind {
                BudgetKind::Good => threshold.good,
                BudgetKind::Poor => threshold.poor,
            },
            unit: threshold.unit,
            kind,
        }
    }
}

/// Default budget set: every core metric must stay inside its good band.
pub fn default_budgets() -> Vec<PerformanceBudget> {
    THRESHOLDS
        .iter()
        .map(|t| PerformanceBudget::from_threshold(t, BudgetKind::Good))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetViolation {
    pub metric: MetricName,
    pub actual: f64,
    pub budget: f64,
    pub unit: Unit,
}

/// One violation per budget whose metric's latest value exceeds it.
/// Metrics with no captured value are never in violation.
pub fn check_budgets(
    budgets: &[PerformanceBudget],
    latest: impl Fn(&MetricName) -> Option<f64>,
) -> Vec<BudgetViolation> {
    budgets
        .iter()
        .filter_map(|b| {
            let actual = latest(&b.metric)?;
            (actual > b.budget).then(|| BudgetViolation {
                metric: b.metric.clone(),
                actual,
                budget: b.budget,
                unit: b.unit,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(values: &[(MetricName, f64)]) -> impl Fn(&MetricName) -> Option<f64> {
        let map: HashMap<MetricName, f64> = values.iter().cloned().collect();
        move |name| map.get(name).copied()
    }

    #[test]
    fn nothing_captured_scores_100() {
        let score = VitalsScore::from_latest(|_| None);
        assert_eq!(score.overall, 100.0);
        assert_eq!(score.scores.cls, 100);
        assert_eq!(score.lcp, 0.0);
    }

    #[test]
    fn overall_is_unweighted_mean_of_bands() {
        let score = VitalsScore::from_latest(lookup(&[
            (MetricName::Fcp, 1500.0), // 100
            (MetricName::Lcp, 5000.0), // 0
            (MetricName::Fid, 200.0),  // 50
            (MetricName::Cls, 0.05),   // 100
            (MetricName::Ttfb, 900.0), // 50
        ]));

        assert_eq!(
            score.scores,
            MetricScores { fcp: 100, lcp: 0, fid: 50, cls: 100, ttfb: 50 }
        );
        assert_eq!(score.overall, 60.0);
        assert_eq!(score.lcp, 5000.0);
    }

    #[test]
    fn default_budgets_follow_good_bounds() {
        let budgets = default_budgets();
        assert_eq!(budgets.len(), 5);
        let lcp = budgets.iter().find(|b| b.metric == MetricName::Lcp).unwrap();
        assert_eq!(lcp.budget, 2500.0);
        assert_eq!(lcp.kind, BudgetKind::Good);
    }

    #[test]
    fn only_captured_metrics_over_budget_are_violations() {
        let violations = check_budgets(
            &default_budgets(),
            lookup(&[
                (MetricName::Lcp, 3100.0),
                (MetricName::Fcp, 1800.0),
                (MetricName::Cls, 0.3),
            ]),
        );

        let names: Vec<&MetricName> = violations.iter().map(|v| &v.metric).collect();
        assert_eq!(names, vec![&MetricName::Lcp, &MetricName::Cls]);
        assert_eq!(violations[0].actual, 3100.0);
        assert_eq!(violations[0].budget, 2500.0);
    }

    #[test]
    fn poor_budgets_use_poor_bound() {
        let budget = PerformanceBudget::from_threshold(&THRESHOLDS[2], BudgetKind::Poor);
        assert_eq!(budget.metric, MetricName::Fid);
        assert_eq!(budget.budget, 300.0);
    }
}
