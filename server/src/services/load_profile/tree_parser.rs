//! Indentation-structured profile parser
//!
//! Lines are leading-whitespace-indented. An indentation increase opens a
//! child; a decrease or equal indentation closes back to the matching
//! ancestor. Lines prefixed by `-` are attribute lines; the remainder are
//! node headers, optionally carrying parenthesized `key=value` parameters.

use super::models::{AttrValue, Attribute, ProfileNode, ProfileTree};
use super::value_parser::ValueParser;
use crate::utils::{DoctorError, DoctorResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write;

static ATTRIBUTE_LINE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-\s+([^:]+):\s*(.*)$").unwrap());

static HEADER_PARAMS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)\s*\((.*)\)\s*:?\s*$").unwrap());

const MAX_PREFIX: &str = "__MAX_OF_";
const MIN_PREFIX: &str = "__MIN_OF_";

pub struct TreeParser;

impl TreeParser {
    /// Parse profile text into a tree. Child order matches the text.
    pub fn parse(text: &str) -> DoctorResult<ProfileTree> {
        let mut tree = ProfileTree::default();
        // Stack of (indent, path into the forest). The path addresses the
        // currently open node; attribute lines attach to the top.
        let mut stack: Vec<(usize, Vec<usize>)> = Vec::new();

        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let indent = line.len() - line.trim_start().len();
            let trimmed = line.trim();

            if let Some(caps) = ATTRIBUTE_LINE_REGEX.captures(trimmed) {
                let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                let raw_value = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

                let Some((_, path)) = stack.last() else {
                    return Err(DoctorError::invalid_arguments(
                        "profile attribute line before any node header",
                    ));
                };
                let node = Self::node_at_mut(&mut tree, path);
                Self::attach_attribute(node, name, raw_value);
                continue;
            }

            // Node header: close to the matching ancestor first.
            while let Some((open_indent, _)) = stack.last() {
                if *open_indent >= indent {
                    stack.pop();
                } else {
                    break;
                }
            }

            let node = Self::parse_header(trimmed);
            let path = match stack.last() {
                Some((_, parent_path)) => {
                    let parent = Self::node_at_mut(&mut tree, parent_path);
                    parent.children.push(node);
                    let mut path = parent_path.clone();
                    path.push(parent.children.len() - 1);
                    path
                },
                None => {
                    tree.roots.push(node);
                    vec![tree.roots.len() - 1]
                },
            };
            stack.push((indent, path));
        }

        Ok(tree)
    }

    fn node_at_mut<'a>(tree: &'a mut ProfileTree, path: &[usize]) -> &'a mut ProfileNode {
        let mut node = &mut tree.roots[path[0]];
        for &index in &path[1..] {
            node = &mut node.children[index];
        }
        node
    }

    /// Parse a node header, splitting off parenthesized parameters.
    fn parse_header(header: &str) -> ProfileNode {
        let header = header.trim_end_matches(':').trim();
        if let Some(caps) = HEADER_PARAMS_REGEX.captures(header) {
            let label = caps.get(1).map(|m| m.as_str().trim()).unwrap_or(header);
            let params = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let mut node = ProfileNode::new(label);
            for pair in params.split(',') {
                if let Some((key, value)) = pair.split_once('=') {
                    node.attributes.push(Attribute {
                        name: key.trim().to_string(),
                        value: AttrValue::Text(value.trim().to_string()),
                        max: None,
                        min: None,
                        raw: pair.trim().to_string(),
                    });
                }
            }
            node
        } else {
            ProfileNode::new(header)
        }
    }

    /// Attach an attribute line, folding `__MAX_OF_`/`__MIN_OF_` variants
    /// onto the base attribute.
    fn attach_attribute(node: &mut ProfileNode, name: &str, raw_value: &str) {
        if let Some(base) = name.strip_prefix(MAX_PREFIX) {
            let value = ValueParser::normalize(raw_value);
            match node.attributes.iter_mut().find(|a| a.name == base) {
                Some(attr) => attr.max = Some(value),
                None => node.attributes.push(Attribute {
                    name: base.to_string(),
                    value: AttrValue::Text(String::new()),
                    max: Some(value),
                    min: None,
                    raw: raw_value.to_string(),
                }),
            }
            return;
        }
        if let Some(base) = name.strip_prefix(MIN_PREFIX) {
            let value = ValueParser::normalize(raw_value);
            match node.attributes.iter_mut().find(|a| a.name == base) {
                Some(attr) => attr.min = Some(value),
                None => node.attributes.push(Attribute {
                    name: base.to_string(),
                    value: AttrValue::Text(String::new()),
                    max: None,
                    min: Some(value),
                    raw: raw_value.to_string(),
                }),
            }
            return;
        }

        let value = ValueParser::normalize(raw_value);
        match node.attributes.iter_mut().find(|a| a.name == name) {
            // A point value arriving after its min/max variants fills the slot.
            Some(attr) => {
                attr.value = value;
                attr.raw = raw_value.to_string();
            },
            None => node.attributes.push(Attribute {
                name: name.to_string(),
                value,
                max: None,
                min: None,
                raw: raw_value.to_string(),
            }),
        }
    }

    /// Re-render a tree back to indentation form. Used by shape round-trip
    /// checks; preserves the `(depth, label)` sequence of the source.
    pub fn render(tree: &ProfileTree) -> String {
        let mut out = String::new();
        for root in &tree.roots {
            Self::render_node(&mut out, root, 0);
        }
        out
    }

    fn render_node(out: &mut String, node: &ProfileNode, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{}{}:", indent, node.label);
        for attr in &node.attributes {
            let _ = writeln!(out, "{}  - {}: {}", indent, attr.name, attr.raw);
        }
        for child in &node.children {
            Self::render_node(out, child, depth + 1);
        }
    }
}
