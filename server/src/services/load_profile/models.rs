//! Profile tree data model
//!
//! A profile is an indentation-structured text; parsing yields a tree of
//! labeled nodes whose attribute values are normalized into typed units.
//! Child order always matches the original text.

use serde::Serialize;

/// A normalized attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "t", content = "v")]
pub enum AttrValue {
    /// Time, normalized to milliseconds.
    TimeMs(f64),
    /// Size, normalized to bytes.
    Bytes(u64),
    Int(i64),
    Float(f64),
    /// Unknown attributes are retained verbatim.
    Text(String),
}

impl AttrValue {
    pub fn time_ms(&self) -> Option<f64> {
        match self {
            Self::TimeMs(ms) => Some(*ms),
            _ => None,
        }
    }

    pub fn bytes(&self) -> Option<u64> {
        match self {
            Self::Bytes(b) => Some(*b),
            _ => None,
        }
    }

    pub fn number(&self) -> Option<f64> {
        match self {
            Self::TimeMs(v) | Self::Float(v) => Some(*v),
            Self::Bytes(b) => Some(*b as f64),
            Self::Int(i) => Some(*i as f64),
            Self::Text(_) => None,
        }
    }
}

/// One attribute: the point value plus optional aggregated min/max variants
/// (`__MIN_OF_` / `__MAX_OF_` lines attach here, keyed by the base name).
#[derive(Debug, Clone, Serialize)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<AttrValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<AttrValue>,
    /// Original text, kept for verbatim re-rendering.
    pub raw: String,
}

/// A node in the profile tree.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileNode {
    pub label: String,
    /// Attribute lines plus parenthesized header parameters, in input order.
    pub attributes: Vec<Attribute>,
    pub children: Vec<ProfileNode>,
}

impl ProfileNode {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), attributes: Vec::new(), children: Vec::new() }
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn time_ms(&self, name: &str) -> Option<f64> {
        self.attr(name).and_then(|a| a.value.time_ms())
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.attr(name).and_then(|a| a.value.number())
    }

    /// Header parameter value (stored as a Text attribute by the parser).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(|a| match &a.value {
            AttrValue::Text(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Depth-first walk over this node and all descendants.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a ProfileNode, usize)) {
        fn inner<'a>(
            node: &'a ProfileNode,
            depth: usize,
            visit: &mut impl FnMut(&'a ProfileNode, usize),
        ) {
            visit(node, depth);
            for child in &node.children {
                inner(child, depth + 1, visit);
            }
        }
        inner(self, 0, visit);
    }
}

/// A parsed profile: an ordered forest of top-level nodes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileTree {
    pub roots: Vec<ProfileNode>,
}

impl ProfileTree {
    /// All nodes whose label starts with the given prefix, in document order.
    pub fn nodes_with_prefix(&self, prefix: &str) -> Vec<&ProfileNode> {
        let mut out = Vec::new();
        for root in &self.roots {
            root.walk(&mut |node, _| {
                if node.label.starts_with(prefix) {
                    out.push(node);
                }
            });
        }
        out
    }

    /// `(depth, label)` pairs in document order; the shape invariant the
    /// renderer round-trips.
    pub fn shape(&self) -> Vec<(usize, String)> {
        let mut out = Vec::new();
        for root in &self.roots {
            root.walk(&mut |node, depth| out.push((depth, node.label.clone())));
        }
        out
    }
}
