mod engine;
mod types;

pub use engine::{compute_aggregate_ranges, derive_scenario, recalculate};
pub use types::{
    AdjustmentSet, AggregateMetrics, CalculatorKind, MetricAdjustment, MetricName, Scenario,
    ScenarioData, ScenarioMetrics, ScenarioRole, Scenarios, ValueRange, Variant,
};
