//! Time-accounting reconciliation
//!
//! A load profile's summary total should be roughly covered by the accounted
//! phase timers. When more than half the wall time is unaccounted for, the
//! missing time almost always hides in phases the sink does not instrument:
//! transaction publish, explicit-commit wait, metadata update, or cross-node
//! RPC. The finding enumerates those so the operator knows where to look.

use super::bottleneck::node_total_ms;
use super::models::ProfileTree;
use crate::models::{Finding, Priority, Severity};
use crate::services::rules::ProfileRules;
use crate::utils::format_duration_ms;
use serde_json::json;

/// Phase timers that count toward the accounted total. Per-phase maxima are
/// taken across nodes so replicated subtrees are not double counted.
const ACCOUNTED_PHASES: &[&str] = &[
    "PrepareTime",
    "OpenTime",
    "AddChunkTime",
    "AddBatchTime",
    "CloseWaitTime",
    "CommitTime",
];

const PROBABLE_SOURCES: &[&str] = &[
    "transaction publish",
    "explicit-commit wait",
    "metadata update",
    "cross-node RPC",
];

/// Compare the top-level summary total with the accounted phase sum.
pub fn check_time_accounting(tree: &ProfileTree, rules: &ProfileRules) -> Vec<Finding> {
    let Some(total_ms) = summary_total_ms(tree) else {
        return Vec::new();
    };
    if total_ms <= 0.0 {
        return Vec::new();
    }

    let mut accounted_ms = 0.0;
    for phase in ACCOUNTED_PHASES {
        let mut phase_max: f64 = 0.0;
        for root in &tree.roots {
            root.walk(&mut |node, _| {
                if let Some(ms) = node.time_ms(phase) {
                    phase_max = phase_max.max(ms);
                }
            });
        }
        accounted_ms += phase_max;
    }

    // A summary total below the phase sum is reported as covered, not as an
    // error: overlapping timers legitimately exceed wall time.
    let unaccounted_ms = (total_ms - accounted_ms).max(0.0);
    let unaccounted_ratio = unaccounted_ms / total_ms;

    if unaccounted_ratio <= rules.unaccounted_ratio {
        return Vec::new();
    }

    vec![
        Finding::new(
            Severity::Warning,
            Priority::Medium,
            "missing_time",
            format!(
                "{:.0}% of the profile total ({} of {}) is not covered by instrumented phases",
                unaccounted_ratio * 100.0,
                format_duration_ms(unaccounted_ms),
                format_duration_ms(total_ms)
            ),
        )
        .evidence("total_ms", total_ms)
        .evidence("accounted_ms", accounted_ms)
        .evidence("unaccounted_ratio", unaccounted_ratio)
        .evidence("probable_sources", json!(PROBABLE_SOURCES))
        .impact("The dominant cost is outside the instrumented write path; optimizing sink phases will not recover it."),
    ]
}

/// The first top-level node carrying a total timer is the summary.
fn summary_total_ms(tree: &ProfileTree) -> Option<f64> {
    tree.roots.iter().find_map(node_total_ms)
}
