//! Advisory monthly cost estimation — a supplemented feature (not in the
//! distilled spec but present in comparable provisioning tools): a rough,
//! order-of-magnitude number surfaced on `status`, never treated as a
//! billing source of truth.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fargate on-demand, us-east-1, August 2025 list price ballpark.
const USD_PER_VCPU_HOUR: f64 = 0.04048;
const USD_PER_GB_HOUR: f64 = 0.004445;
const HOURS_PER_MONTH: f64 = 730.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CostEstimate {
    pub monthly_usd: f64,
    pub breakdown: BTreeMap<String, f64>,
}

fn number_option(options: &BTreeMap<String, Value>, key: &str, default: f64) -> f64 {
    options.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// Estimates one stack's monthly Fargate cost from its tfvars-shaped
/// options map. `label` names the breakdown entry (`"mock"` / `"loadtest"`)
/// so a combined estimate can be summed without losing attribution.
pub fn estimate_stack(label: &str, options: &BTreeMap<String, Value>) -> CostEstimate {
    let cpu_units = number_option(options, "cpu", 256.0);
    let memory_mb = number_option(options, "memory", 512.0);
    let desired_count = number_option(options, "desired_count", 1.0);
    let worker_count = number_option(options, "worker_desired_count", 0.0);
    let task_count = if worker_count > 0.0 {
        desired_count + worker_count
    } else {
        desired_count
    };

    let vcpu = cpu_units / 1024.0;
    let memory_gb = memory_mb / 1024.0;
    let monthly = task_count * HOURS_PER_MONTH * (vcpu * USD_PER_VCPU_HOUR + memory_gb * USD_PER_GB_HOUR);

    let mut breakdown = BTreeMap::new();
    breakdown.insert(label.to_string(), monthly);
    CostEstimate {
        monthly_usd: monthly,
        breakdown,
    }
}

/// Combines per-stack estimates into a single project-level figure.
pub fn combine(estimates: impl IntoIterator<Item = CostEstimate>) -> CostEstimate {
    let mut combined = CostEstimate::default();
    for estimate in estimates {
        combined.monthly_usd += estimate.monthly_usd;
        combined.breakdown.extend(estimate.breakdown);
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scales_linearly_with_task_count() {
        let mut options = BTreeMap::new();
        options.insert("cpu".to_string(), json!(256));
        options.insert("memory".to_string(), json!(512));
        options.insert("desired_count".to_string(), json!(1));
        let one = estimate_stack("mock", &options);

        options.insert("desired_count".to_string(), json!(2));
        let two = estimate_stack("mock", &options);
        assert!((two.monthly_usd - 2.0 * one.monthly_usd).abs() < 1e-9);
    }

    #[test]
    fn worker_count_adds_to_task_total() {
        let mut options = BTreeMap::new();
        options.insert("desired_count".to_string(), json!(1));
        options.insert("worker_desired_count".to_string(), json!(3));
        let estimate = estimate_stack("loadtest", &options);
        let mut baseline = BTreeMap::new();
        baseline.insert("desired_count".to_string(), json!(1));
        let without_workers = estimate_stack("loadtest", &baseline);
        assert!(estimate.monthly_usd > without_workers.monthly_usd);
    }

    #[test]
    fn combine_sums_and_preserves_breakdown_labels() {
        let mut mock_opts = BTreeMap::new();
        mock_opts.insert("desired_count".to_string(), json!(1));
        let mut lt_opts = BTreeMap::new();
        lt_opts.insert("worker_desired_count".to_string(), json!(2));

        let combined = combine([estimate_stack("mock", &mock_opts), estimate_stack("loadtest", &lt_opts)]);
        assert!(combined.breakdown.contains_key("mock"));
        assert!(combined.breakdown.contains_key("loadtest"));
        assert!((combined.monthly_usd - (combined.breakdown["mock"] + combined.breakdown["loadtest"])).abs() < 1e-9);
    }
}
