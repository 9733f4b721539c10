//! Bottleneck inference over a parsed load profile
//!
//! For each `Index` node the sink reports three wait components besides the
//! effective write path. A single component dominating `AddChunkTime` points
//! at a specific subsystem: memtable flush, sink writer scheduling, or
//! replica synchronization.

use super::models::{ProfileNode, ProfileTree};
use crate::models::{Finding, Priority, RecommendedAction, Severity};
use crate::services::rules::ProfileRules;
use crate::utils::format_duration_ms;

struct WaitComponent {
    attr: &'static str,
    kind: &'static str,
    subsystem: &'static str,
    advice: &'static str,
}

/// Components checked per index, with their finding slugs.
const COMPONENTS: &[WaitComponent] = &[
    WaitComponent {
        attr: "WaitFlushTime",
        kind: "bottleneck_memtable_flush",
        subsystem: "memtable flush",
        advice: "Increase flush_thread_num_per_store or spread the load across more partitions",
    },
    WaitComponent {
        attr: "WaitWriterTime",
        kind: "bottleneck_sink_writer",
        subsystem: "sink writer scheduling",
        advice: "Raise the number of sink writers (load_parallel_instance_num) or reduce concurrent loads",
    },
    WaitComponent {
        attr: "WaitReplicaTime",
        kind: "bottleneck_replica_sync",
        subsystem: "replica synchronization",
        advice: "Check follower BE health and inter-node network latency",
    },
];

/// Scan every `Index` node and emit findings for dominant wait components.
pub fn find_bottlenecks(tree: &ProfileTree, rules: &ProfileRules) -> Vec<Finding> {
    let mut findings = Vec::new();

    for index_node in tree.nodes_with_prefix("Index") {
        let Some(add_chunk_ms) = index_node.time_ms("AddChunkTime") else {
            continue;
        };
        if add_chunk_ms <= 0.0 {
            continue;
        }

        let wait_flush = index_node.time_ms("WaitFlushTime").unwrap_or(0.0);
        let wait_writer = index_node.time_ms("WaitWriterTime").unwrap_or(0.0);
        let wait_replica = index_node.time_ms("WaitReplicaTime").unwrap_or(0.0);
        let wait_total = wait_flush + wait_writer + wait_replica;
        let effective_ms = (add_chunk_ms - wait_total).max(0.0);

        for component in COMPONENTS {
            let wait_ms = match component.attr {
                "WaitFlushTime" => wait_flush,
                "WaitWriterTime" => wait_writer,
                _ => wait_replica,
            };
            let ratio = wait_ms / add_chunk_ms;
            let threshold = if component.attr == "WaitReplicaTime" {
                rules.replica_wait_ratio
            } else {
                rules.wait_ratio
            };
            if ratio <= threshold {
                continue;
            }

            let (severity, priority) = if ratio > rules.severe_wait_ratio {
                (Severity::Critical, Priority::Immediate)
            } else {
                (Severity::Warning, Priority::High)
            };

            let mut finding = Finding::new(
                severity,
                priority,
                component.kind,
                format!(
                    "{} consumed {:.0}% of AddChunkTime ({} of {})",
                    component.subsystem,
                    ratio * 100.0,
                    format_duration_ms(wait_ms),
                    format_duration_ms(add_chunk_ms)
                ),
            )
            .evidence("wait_ratio", ratio)
            .evidence("wait_ms", wait_ms)
            .evidence("add_chunk_ms", add_chunk_ms)
            .evidence("effective_ms", effective_ms)
            .impact("Ingestion throughput is bounded by this wait, not by write work.")
            .action(RecommendedAction::new(component.advice));

            if let Some(id) = index_node.param("id") {
                finding = finding.evidence("index_id", id);
            }

            findings.push(finding);
        }
    }

    findings
}

/// Exposed for the reconcile routine: a node's own wall time when labeled.
pub fn node_total_ms(node: &ProfileNode) -> Option<f64> {
    node.time_ms("TotalTime").or_else(|| node.time_ms("Total"))
}
