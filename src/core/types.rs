use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Metrics that carry their own optimistic/pessimistic multiplier.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricName {
    Revenue,
    Costs,
    MarketShare,
    CustomerGrowth,
    BaselineClients,
    OperatingExpenses,
    ProfitMargin,
}

impl MetricName {
    pub const ALL: [MetricName; 7] = [
        MetricName::Revenue,
        MetricName::Costs,
        MetricName::MarketShare,
        MetricName::CustomerGrowth,
        MetricName::BaselineClients,
        MetricName::OperatingExpenses,
        MetricName::ProfitMargin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricName::Revenue => "revenue",
            MetricName::Costs => "costs",
            MetricName::MarketShare => "marketShare",
            MetricName::CustomerGrowth => "customerGrowth",
            MetricName::BaselineClients => "baselineClients",
            MetricName::OperatingExpenses => "operatingExpenses",
            MetricName::ProfitMargin => "profitMargin",
        }
    }

    pub fn value_in(self, metrics: &ScenarioMetrics) -> f64 {
        match self {
            MetricName::Revenue => metrics.revenue,
            MetricName::Costs => metrics.costs,
            MetricName::MarketShare => metrics.market_share,
            MetricName::CustomerGrowth => metrics.customer_growth,
            MetricName::BaselineClients => metrics.baseline_clients,
            MetricName::OperatingExpenses => metrics.operating_expenses,
            MetricName::ProfitMargin => metrics.profit_margin,
        }
    }

    pub(crate) fn slot_mut(self, metrics: &mut ScenarioMetrics) -> &mut f64 {
        match self {
            MetricName::Revenue => &mut metrics.revenue,
            MetricName::Costs => &mut metrics.costs,
            MetricName::MarketShare => &mut metrics.market_share,
            MetricName::CustomerGrowth => &mut metrics.customer_growth,
            MetricName::BaselineClients => &mut metrics.baseline_clients,
            MetricName::OperatingExpenses => &mut metrics.operating_expenses,
            MetricName::ProfitMargin => &mut metrics.profit_margin,
        }
    }
}

impl std::fmt::Display for MetricName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Which alternate scenario a derivation produces.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Optimistic,
    Pessimistic,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioRole {
    Base,
    Optimistic,
    Pessimistic,
}

impl From<Variant> for ScenarioRole {
    fn from(value: Variant) -> Self {
        match value {
            Variant::Optimistic => ScenarioRole::Optimistic,
            Variant::Pessimistic => ScenarioRole::Pessimistic,
        }
    }
}

/// One full set of financial metrics. `market_share` and `profit_margin` are percentages.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioMetrics {
    pub revenue: f64,
    pub costs: f64,
    pub market_share: f64,
    pub customer_growth: f64,
    pub baseline_clients: f64,
    pub operating_expenses: f64,
    pub profit_margin: f64,
    #[serde(default)]
    pub expected_revenue: f64,
    #[serde(default)]
    pub expected_profit: f64,
}

impl ScenarioMetrics {
    /// Copy with `expected_revenue`/`expected_profit` recomputed from this set's own fields.
    pub fn with_derived(mut self) -> Self {
        self.expected_revenue = self.revenue;
        self.expected_profit = self.revenue - self.costs - self.operating_expenses;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Optional on input for the derived scenarios; [`crate::core::recalculate`]
    /// overwrites it.
    #[serde(default)]
    pub metrics: ScenarioMetrics,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenarios {
    pub base: Scenario,
    pub optimistic: Scenario,
    pub pessimistic: Scenario,
}

impl Scenarios {
    pub fn get(&self, role: ScenarioRole) -> &Scenario {
        match role {
            ScenarioRole::Base => &self.base,
            ScenarioRole::Optimistic => &self.optimistic,
            ScenarioRole::Pessimistic => &self.pessimistic,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        [&self.base, &self.optimistic, &self.pessimistic].into_iter()
    }

    /// Sum of the three probabilities. Expected to be 1.0 but never enforced.
    pub fn probability_sum(&self) -> f64 {
        self.iter().map(|s| s.probability).sum()
    }
}

/// Scale factors for one metric. 1.0 leaves the base value unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricAdjustment {
    pub optimistic_multiplier: f64,
    pub pessimistic_multiplier: f64,
}

impl MetricAdjustment {
    pub const NEUTRAL: MetricAdjustment = MetricAdjustment {
        optimistic_multiplier: 1.0,
        pessimistic_multiplier: 1.0,
    };

    pub fn new(optimistic_multiplier: f64, pessimistic_multiplier: f64) -> Self {
        Self {
            optimistic_multiplier,
            pessimistic_multiplier,
        }
    }

    pub fn multiplier(&self, variant: Variant) -> f64 {
        match variant {
            Variant::Optimistic => self.optimistic_multiplier,
            Variant::Pessimistic => self.pessimistic_multiplier,
        }
    }
}

impl Default for MetricAdjustment {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

pub type AdjustmentSet = BTreeMap<MetricName, MetricAdjustment>;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    /// Sorted range over two values, whichever order they arrive in.
    pub fn spanning(a: f64, b: f64) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateMetrics {
    pub expected_revenue: f64,
    pub expected_profit: f64,
    pub market_share_range: ValueRange,
    pub customer_growth_range: ValueRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioData {
    pub scenarios: Scenarios,
    pub adjustments: AdjustmentSet,
    #[serde(default)]
    pub metrics: AggregateMetrics,
    /// UI selection state; carried through untouched.
    pub active_tab: String,
}

/// A payload type that can live inside a stored state or a transfer envelope.
pub trait CalculatorKind: Serialize + DeserializeOwned {
    /// Discriminator written to `calculatorType` / envelope `type`.
    const CALCULATOR_TYPE: &'static str;
}

impl CalculatorKind for ScenarioData {
    const CALCULATOR_TYPE: &'static str = "scenario-planner";
}
