// src/figure.rs
//! Minimal FypML figure model: a titled, ordered list of graphic nodes
//! plus the edit bookkeeping the auto-saver relies on.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FigureNode {
    /// Node type, e.g. `graph`, `scatter`, `legend`, `text`.
    pub kind: String,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

impl FigureNode {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), props: BTreeMap::new() }
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }
}

/// One figure document. `Clone` is a deep, independent copy.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Figure {
    pub title: String,
    #[serde(default)]
    nodes: Vec<FigureNode>,

    #[serde(skip)]
    modified: bool,
    #[serde(skip)]
    modify_count: u64,
}

impl Figure {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            nodes: Vec::new(),
            modified: false,
            modify_count: 0,
        }
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    /// Edits applied since this figure was created or loaded.
    pub fn modify_count(&self) -> u64 {
        self.modify_count
    }

    pub fn nodes(&self) -> &[FigureNode] {
        &self.nodes
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    pub fn add_node(&mut self, node: FigureNode) {
        self.nodes.push(node);
        self.touch();
    }

    pub fn remove_node(&mut self, idx: usize) -> Option<FigureNode> {
        if idx >= self.nodes.len() {
            return None;
        }
        let node = self.nodes.remove(idx);
        self.touch();
        Some(node)
    }

    /// Returns false when `idx` is out of range.
    pub fn set_property(&mut self, idx: usize, key: &str, value: &str) -> bool {
        let Some(node) = self.nodes.get_mut(idx) else { return false };
        node.props.insert(key.to_string(), value.to_string());
        self.touch();
        true
    }

    /// Same title and node tree, ignoring edit bookkeeping.
    pub fn same_content(&self, other: &Figure) -> bool {
        self.title == other.title && self.nodes == other.nodes
    }

    fn touch(&mut self) {
        self.modify_count += 1;
        self.modified = true;
    }
}
