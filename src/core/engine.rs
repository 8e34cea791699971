use serde_json::Value;

use super::types::{
    AdjustmentSet, AggregateMetrics, MetricAdjustment, MetricName, Scenario, ScenarioData,
    ScenarioMetrics, ScenarioRole, Scenarios, ValueRange, Variant,
};
use crate::error::EngineError;

/// Derives the optimistic or pessimistic metric set from `base`.
///
/// Every tracked metric that has an entry in `adjustments` is multiplied by the
/// multiplier `variant` selects; metrics without an entry keep their base value.
/// `expected_revenue` and `expected_profit` are never scaled, they are recomputed
/// from the scaled fields so they cannot drift from their components.
pub fn derive_scenario(
    base: &ScenarioMetrics,
    adjustments: &AdjustmentSet,
    variant: Variant,
) -> Result<ScenarioMetrics, EngineError> {
    validate_primary_metrics(base, "base")?;
    for (name, adjustment) in adjustments {
        let multiplier = adjustment.multiplier(variant);
        if !multiplier.is_finite() {
            return Err(EngineError::invalid(
                format!("adjustments.{name}"),
                format!("{variant:?} multiplier must be finite, got {multiplier}"),
            ));
        }
    }

    let derived = scale_metrics(base, adjustments, variant);
    validate_all_metrics(&derived, variant_label(variant))?;
    Ok(derived)
}

/// Probability-weighted expectations and sorted optimistic/pessimistic ranges.
///
/// Probabilities are used as given: no renormalization when they do not sum to 1.
pub fn compute_aggregate_ranges(data: &ScenarioData) -> AggregateMetrics {
    let scenarios = &data.scenarios;
    let expected_revenue: f64 = scenarios
        .iter()
        .map(|s| s.probability * s.metrics.expected_revenue)
        .sum();
    let expected_profit: f64 = scenarios
        .iter()
        .map(|s| s.probability * s.metrics.expected_profit)
        .sum();

    let optimistic = &scenarios.optimistic.metrics;
    let pessimistic = &scenarios.pessimistic.metrics;
    AggregateMetrics {
        expected_revenue,
        expected_profit,
        market_share_range: ValueRange::spanning(optimistic.market_share, pessimistic.market_share),
        customer_growth_range: ValueRange::spanning(
            optimistic.customer_growth,
            pessimistic.customer_growth,
        ),
    }
}

/// Re-runs the whole derivation: refreshes the base's derived fields, rebuilds both
/// alternate scenarios from base + adjustments and recomputes the aggregates.
///
/// Ids, names, descriptions, probabilities and `active_tab` pass through unchanged.
pub fn recalculate(data: &ScenarioData) -> Result<ScenarioData, EngineError> {
    for role in [
        ScenarioRole::Base,
        ScenarioRole::Optimistic,
        ScenarioRole::Pessimistic,
    ] {
        let probability = data.scenarios.get(role).probability;
        if !probability.is_finite() {
            return Err(EngineError::invalid(
                format!("scenarios.{}.probability", role_label(role)),
                format!("must be finite, got {probability}"),
            ));
        }
    }

    let base_metrics = data.scenarios.base.metrics;
    validate_primary_metrics(&base_metrics, "base")?;
    let optimistic = derive_scenario(&base_metrics, &data.adjustments, Variant::Optimistic)?;
    let pessimistic = derive_scenario(&base_metrics, &data.adjustments, Variant::Pessimistic)?;

    let mut next = data.clone();
    next.scenarios.base.metrics = base_metrics.with_derived();
    next.scenarios.optimistic.metrics = optimistic;
    next.scenarios.pessimistic.metrics = pessimistic;
    next.metrics = compute_aggregate_ranges(&next);
    Ok(next)
}

impl ScenarioMetrics {
    /// Builds a metric set from untyped JSON, rejecting missing, non-numeric or
    /// non-finite tracked metrics. The expected fields are recomputed, not read.
    pub fn from_value(value: &Value) -> Result<Self, EngineError> {
        let object = value
            .as_object()
            .ok_or_else(|| EngineError::invalid("metrics", "expected a JSON object"))?;

        let mut metrics = ScenarioMetrics::default();
        for name in MetricName::ALL {
            let raw = object
                .get(name.as_str())
                .ok_or_else(|| EngineError::invalid(name.as_str(), "missing"))?;
            let number = raw.as_f64().ok_or_else(|| {
                EngineError::invalid(name.as_str(), format!("expected a number, got {raw}"))
            })?;
            if !number.is_finite() {
                return Err(EngineError::invalid(name.as_str(), "must be finite"));
            }
            *name.slot_mut(&mut metrics) = number;
        }
        Ok(metrics.with_derived())
    }
}

impl ScenarioData {
    /// Parses an untyped derivation request.
    ///
    /// Only the base metrics, the adjustments and the scenario descriptors are
    /// required. Expected fields, variant metrics and the aggregate may be left out
    /// since [`recalculate`] computes them. Missing base metrics are named in the error.
    pub fn from_request(value: Value) -> Result<Self, EngineError> {
        let base = value
            .pointer("/scenarios/base/metrics")
            .ok_or_else(|| EngineError::invalid("base.metrics", "missing"))?;
        ScenarioMetrics::from_value(base)?;
        serde_json::from_value(value).map_err(|e| EngineError::invalid("payload", e.to_string()))
    }
}

impl Default for ScenarioData {
    /// Three-scenario template with the sample base case and multipliers the
    /// planner opens with.
    fn default() -> Self {
        let base = ScenarioMetrics {
            revenue: 1_000_000.0,
            costs: 600_000.0,
            market_share: 5.0,
            customer_growth: 10.0,
            baseline_clients: 100.0,
            operating_expenses: 200_000.0,
            profit_margin: 20.0,
            expected_revenue: 0.0,
            expected_profit: 0.0,
        }
        .with_derived();

        let adjustments: AdjustmentSet = [
            (MetricName::Revenue, MetricAdjustment::new(1.2, 0.8)),
            (MetricName::Costs, MetricAdjustment::new(0.9, 1.1)),
            (MetricName::MarketShare, MetricAdjustment::new(1.15, 0.85)),
            (MetricName::CustomerGrowth, MetricAdjustment::new(1.25, 0.75)),
            (MetricName::BaselineClients, MetricAdjustment::new(1.1, 0.9)),
            (MetricName::OperatingExpenses, MetricAdjustment::new(0.95, 1.05)),
            (MetricName::ProfitMargin, MetricAdjustment::new(1.1, 0.9)),
        ]
        .into_iter()
        .collect();

        let scenario = |id: &str,
                        name: &str,
                        description: &str,
                        metrics: ScenarioMetrics,
                        probability: f64| Scenario {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            metrics,
            probability,
        };

        let mut data = ScenarioData {
            scenarios: Scenarios {
                base: scenario("base", "Base Case", "Most likely outcome", base, 0.5),
                optimistic: scenario(
                    "optimistic",
                    "Optimistic Case",
                    "Best-case outcome",
                    scale_metrics(&base, &adjustments, Variant::Optimistic),
                    0.25,
                ),
                pessimistic: scenario(
                    "pessimistic",
                    "Pessimistic Case",
                    "Worst-case outcome",
                    scale_metrics(&base, &adjustments, Variant::Pessimistic),
                    0.25,
                ),
            },
            adjustments,
            metrics: AggregateMetrics::default(),
            active_tab: "base".to_string(),
        };
        data.metrics = compute_aggregate_ranges(&data);
        data
    }
}

fn scale_metrics(
    base: &ScenarioMetrics,
    adjustments: &AdjustmentSet,
    variant: Variant,
) -> ScenarioMetrics {
    let mut scaled = *base;
    for (name, adjustment) in adjustments {
        *name.slot_mut(&mut scaled) = name.value_in(base) * adjustment.multiplier(variant);
    }
    scaled.with_derived()
}

fn validate_primary_metrics(metrics: &ScenarioMetrics, label: &str) -> Result<(), EngineError> {
    for name in MetricName::ALL {
        let value = name.value_in(metrics);
        if !value.is_finite() {
            return Err(EngineError::invalid(
                format!("{label}.{name}"),
                format!("must be finite, got {value}"),
            ));
        }
    }
    Ok(())
}

fn validate_all_metrics(metrics: &ScenarioMetrics, label: &str) -> Result<(), EngineError> {
    validate_primary_metrics(metrics, label)?;
    for (field, value) in [
        ("expectedRevenue", metrics.expected_revenue),
        ("expectedProfit", metrics.expected_profit),
    ] {
        if !value.is_finite() {
            return Err(EngineError::invalid(
                format!("{label}.{field}"),
                "derived value overflowed",
            ));
        }
    }
    Ok(())
}

fn variant_label(variant: Variant) -> &'static str {
    role_label(variant.into())
}

fn role_label(role: ScenarioRole) -> &'static str {
    match role {
        ScenarioRole::Base => "base",
        ScenarioRole::Optimistic => "optimistic",
        ScenarioRole::Pessimistic => "pessimistic",
    }
}
