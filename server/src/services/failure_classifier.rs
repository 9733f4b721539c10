//! Deterministic load-failure classifier
//!
//! Classifies a load job's error text into a closed category set using
//! priority-ordered matchers. The ladder order is part of the contract:
//! timeout > resource > network > file > permission > transaction >
//! configuration > data_quality > cancelled > other. A lower-priority
//! pattern never wins against a higher one, so e.g. "column" inside an OOM
//! message cannot misclassify the failure as data quality.

use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};

/// Closed category set, shared with the LLM adapter's output contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Timeout,
    Resource,
    Network,
    File,
    PermissionDenied,
    Transaction,
    Configuration,
    DataQuality,
    Cancelled,
    Other,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Resource => "resource",
            Self::Network => "network",
            Self::File => "file",
            Self::PermissionDenied => "permission_denied",
            Self::Transaction => "transaction",
            Self::Configuration => "configuration",
            Self::DataQuality => "data_quality",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }

    /// Parse an LLM-supplied category string; anything outside the closed
    /// set is rejected by the caller.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "timeout" => Some(Self::Timeout),
            "resource" => Some(Self::Resource),
            "network" => Some(Self::Network),
            "file" => Some(Self::File),
            "permission_denied" | "permission" => Some(Self::PermissionDenied),
            "transaction" => Some(Self::Transaction),
            "configuration" => Some(Self::Configuration),
            "data_quality" => Some(Self::DataQuality),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// One ladder rung: category plus its matcher set.
struct Rung {
    category: FailureCategory,
    patterns: RegexSet,
}

macro_rules! rung {
    ($category:expr, [$($pattern:expr),+ $(,)?]) => {
        Rung {
            category: $category,
            patterns: RegexSet::new([$(concat!("(?i)", $pattern)),+]).expect("invalid matcher pattern"),
        }
    };
}

/// The ladder, in strictly decreasing priority.
static LADDER: Lazy<Vec<Rung>> = Lazy::new(|| vec![
    rung!(FailureCategory::Timeout, [
        r"timeout",
        r"timed?\s*out",
        r"\[E1008\]",
        r"exceed.*time\s*limit",
    ]),
    rung!(FailureCategory::Resource, [
        r"out of memory",
        r"\boom\b",
        r"memory (limit|exceeded)",
        r"mem_limit",
        r"no available (worker|backend|be)",
        r"too many (running|pending) (txn|task)",
        r"capacity",
    ]),
    rung!(FailureCategory::Network, [
        r"connection (refused|reset|closed)",
        r"broken pipe",
        r"no route to host",
        r"rpc (error|fail)",
        r"send fragment",
    ]),
    rung!(FailureCategory::File, [
        r"file (not|does not) (found|exist)",
        r"no such file",
        r"path (not|does not) exist",
        r"404",
        r"NoSuchKey",
    ]),
    rung!(FailureCategory::PermissionDenied, [
        r"access denied",
        r"permission denied",
        r"403",
        r"not authorized",
        r"authentication",
    ]),
    rung!(FailureCategory::Transaction, [
        r"transaction (aborted|conflict|expired|not found)",
        r"\btxn\b.*(abort|conflict|expire)",
        r"publish (version )?(fail|timeout)",
        r"two.?phase commit",
        r"commit failed",
    ]),
    rung!(FailureCategory::Configuration, [
        r"invalid (parameter|property|config)",
        r"unknown (property|parameter)",
        r"unsupported (format|type|compression)",
        r"format (as|is) not supported",
    ]),
    rung!(FailureCategory::DataQuality, [
        r"too many filtered rows",
        r"column (count|number).*(mismatch|doesn't match)",
        r"unknown column",
        r"parse (error|fail)",
        r"type (mismatch|convert)",
        r"value.*(out of range|too long)",
        r"quality.*(not good enough|abort)",
    ]),
    rung!(FailureCategory::Cancelled, [
        r"cancel+ed",
        r"aborted by user",
        r"killed",
    ]),
]);

/// Classify an error message. Pure function of the text; returns
/// [`FailureCategory::Other`] when no rung matches.
pub fn classify_failure(error_text: &str) -> FailureCategory {
    if error_text.trim().is_empty() {
        return FailureCategory::Other;
    }
    for rung in LADDER.iter() {
        if rung.patterns.is_match(error_text) {
            return rung.category;
        }
    }
    FailureCategory::Other
}
