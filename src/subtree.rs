//! Fragmentation subtrees: the explanation extracted from a graph.
//!
//! A [`CombinatorialSubtree`] is an arena of tree nodes rooted at the
//! intact molecule. Nodes are tombstoned on removal so sibling indices
//! stay stable while calculators grow and prune the tree. The root's
//! own fragment score is not part of the tree score.

use std::collections::{HashMap, VecDeque};

use bit_set::BitSet;
use serde::Serialize;
use thiserror::Error;

use crate::{
    fragment::CombinatorialFragment, graph::compare_keys, molecule::MolecularGraph,
};

/// The edge from a node's parent, recording the cut bonds.
#[derive(Debug, Clone)]
pub struct SubtreeEdge {
    source: usize,
    cut1: Option<usize>,
    cut2: Option<usize>,
    direction1: bool,
    direction2: bool,
    score: f64,
}

impl SubtreeEdge {
    pub fn source(&self) -> usize {
        self.source
    }

    pub fn cut1(&self) -> Option<usize> {
        self.cut1
    }

    pub fn cut2(&self) -> Option<usize> {
        self.cut2
    }

    pub fn direction1(&self) -> bool {
        self.direction1
    }

    pub fn direction2(&self) -> bool {
        self.direction2
    }

    pub fn score(&self) -> f64 {
        self.score
    }
}

#[derive(Debug, Clone)]
pub struct SubtreeNode {
    fragment: CombinatorialFragment,
    depth: u16,
    bondbreaks: u16,
    fragment_score: f64,
    edge: Option<SubtreeEdge>,
    children: Vec<usize>,
    removed: bool,
}

impl SubtreeNode {
    pub fn fragment(&self) -> &CombinatorialFragment {
        &self.fragment
    }

    pub fn depth(&self) -> u16 {
        self.depth
    }

    pub fn bondbreaks(&self) -> u16 {
        self.bondbreaks
    }

    pub fn fragment_score(&self) -> f64 {
        self.fragment_score
    }

    /// The incoming edge; `None` for the root.
    pub fn edge(&self) -> Option<&SubtreeEdge> {
        self.edge.as_ref()
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }
}

/// A rooted tree of fragments with score bookkeeping.
pub struct CombinatorialSubtree<'a> {
    mol: &'a MolecularGraph,
    score: f64,
    nodes: Vec<SubtreeNode>,
    key_to_node: HashMap<BitSet, usize>,
}

impl<'a> CombinatorialSubtree<'a> {
    /// A tree holding only the root fragment; the tree score starts at
    /// zero.
    pub fn new(mol: &'a MolecularGraph) -> Self {
        let root = mol.as_fragment();
        let key = root.node_key(mol.natoms());
        let mut key_to_node = HashMap::new();
        key_to_node.insert(key, 0);
        Self {
            mol,
            score: 0.0,
            nodes: vec![SubtreeNode {
                fragment: root,
                depth: 0,
                bondbreaks: 0,
                fragment_score: 0.0,
                edge: None,
                children: Vec::new(),
                removed: false,
            }],
            key_to_node,
        }
    }

    pub fn molecule(&self) -> &'a MolecularGraph {
        self.mol
    }

    /// Index of the root node.
    pub fn root(&self) -> usize {
        0
    }

    pub fn node(&self, id: usize) -> &SubtreeNode {
        &self.nodes[id]
    }

    /// Live node ids, root included, in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&i| !self.nodes[i].removed)
    }

    /// Live node count, root included.
    pub fn number_of_nodes(&self) -> usize {
        self.node_ids().count()
    }

    /// Sum of fragment and edge scores over all non-root nodes.
    pub fn get_score(&self) -> f64 {
        self.score
    }

    pub fn get_node(&self, fragment: &CombinatorialFragment) -> Option<usize> {
        self.key_to_node
            .get(&fragment.node_key(self.mol.natoms()))
            .copied()
    }

    pub fn contains(&self, fragment: &CombinatorialFragment) -> bool {
        self.get_node(fragment).is_some()
    }

    /// Attach `fragment` under `parent`. Returns `None` without
    /// modification if a node with the same key already exists.
    pub fn add_fragment(
        &mut self,
        parent: usize,
        fragment: &CombinatorialFragment,
        cut1: Option<usize>,
        cut2: Option<usize>,
        fragment_score: f64,
        edge_score: f64,
    ) -> Option<usize> {
        let key = fragment.node_key(self.mol.natoms());
        if self.key_to_node.contains_key(&key) {
            return None;
        }
        let direction_of = |cut: Option<usize>| {
            cut.map(|b| fragment.contains(self.mol.bond_endpoints(b).0))
                .unwrap_or(false)
        };
        let ncuts = (cut1.is_some() as u16) + (cut2.is_some() as u16);
        let id = self.nodes.len();
        self.nodes.push(SubtreeNode {
            fragment: fragment.clone(),
            depth: self.nodes[parent].depth + 1,
            bondbreaks: self.nodes[parent].bondbreaks + ncuts,
            fragment_score,
            edge: Some(SubtreeEdge {
                source: parent,
                cut1,
                cut2,
                direction1: direction_of(cut1),
                direction2: direction_of(cut2),
                score: edge_score,
            }),
            children: Vec::new(),
            removed: false,
        });
        self.nodes[parent].children.push(id);
        self.key_to_node.insert(key, id);
        self.score += fragment_score + edge_score;
        Some(id)
    }

    /// Detach the node at `id` with its whole subtree, subtracting the
    /// removed fragment and edge scores. The root is never removed.
    pub fn remove_subtree_at(&mut self, id: usize) -> bool {
        if id == 0 || id >= self.nodes.len() || self.nodes[id].removed {
            return false;
        }
        if let Some(edge) = &self.nodes[id].edge {
            let parent = edge.source;
            self.nodes[parent].children.retain(|&c| c != id);
        }
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            let key = self.nodes[n].fragment.node_key(self.mol.natoms());
            self.key_to_node.remove(&key);
            self.nodes[n].removed = true;
            self.score -= self.nodes[n].fragment_score;
            if let Some(edge) = &self.nodes[n].edge {
                self.score -= edge.score;
            }
            stack.extend(self.nodes[n].children.clone());
        }
        true
    }

    /// Detach the subtree rooted at `fragment`, if present.
    pub fn remove_subtree(&mut self, fragment: &CombinatorialFragment) -> bool {
        match self.get_node(fragment) {
            Some(id) => self.remove_subtree_at(id),
            None => false,
        }
    }

    /// Re-hang the node at `id` (with its subtree) under `new_parent`
    /// through a new edge, then recompute depths and bond breaks.
    /// Fails if the node is the root, removed, or a descendant would
    /// become its own ancestor.
    pub fn replace_subtree(
        &mut self,
        id: usize,
        new_parent: usize,
        cut1: Option<usize>,
        cut2: Option<usize>,
        edge_score: f64,
    ) -> bool {
        if id == 0 || id >= self.nodes.len() || self.nodes[id].removed {
            return false;
        }
        if self.nodes[new_parent].removed {
            return false;
        }
        // Reject cycles: new_parent must not live below id.
        let mut cursor = new_parent;
        loop {
            if cursor == id {
                return false;
            }
            match &self.nodes[cursor].edge {
                Some(edge) => cursor = edge.source,
                None => break,
            }
        }
        let direction_of = |cut: Option<usize>, fragment: &CombinatorialFragment| {
            cut.map(|b| fragment.contains(self.mol.bond_endpoints(b).0))
                .unwrap_or(false)
        };
        let old_parent = match &self.nodes[id].edge {
            Some(edge) => edge.source,
            None => return false,
        };
        let old_score = self.nodes[id].edge.as_ref().map(|e| e.score).unwrap_or(0.0);
        self.nodes[old_parent].children.retain(|&c| c != id);
        let fragment = self.nodes[id].fragment.clone();
        self.nodes[id].edge = Some(SubtreeEdge {
            source: new_parent,
            cut1,
            cut2,
            direction1: direction_of(cut1, &fragment),
            direction2: direction_of(cut2, &fragment),
            score: edge_score,
        });
        self.nodes[new_parent].children.push(id);
        self.score += edge_score - old_score;
        self.update();
        true
    }

    /// Recompute depths, bond breaks and the tree score from scratch by
    /// a breadth-first pass from the root.
    pub fn update(&mut self) {
        let mut score = 0.0;
        let mut queue = VecDeque::from([0usize]);
        while let Some(n) = queue.pop_front() {
            if n != 0 {
                let (parent, ncuts, edge_score) = match &self.nodes[n].edge {
                    Some(edge) => (
                        edge.source,
                        (edge.cut1.is_some() as u16) + (edge.cut2.is_some() as u16),
                        edge.score,
                    ),
                    None => (0, 0, 0.0),
                };
                self.nodes[n].depth = self.nodes[parent].depth + 1;
                self.nodes[n].bondbreaks = self.nodes[parent].bondbreaks + ncuts;
                score += self.nodes[n].fragment_score + edge_score;
            }
            queue.extend(self.nodes[n].children.iter().copied());
        }
        self.score = score;
    }

    /// How often `bond` is cut in this tree, split by direction:
    /// `[kept-first-endpoint, kept-second-endpoint]`.
    pub fn number_of_cuts(&self, bond: usize) -> [usize; 2] {
        let mut counts = [0usize; 2];
        for id in self.node_ids() {
            if let Some(edge) = &self.nodes[id].edge {
                if edge.cut1 == Some(bond) {
                    counts[if edge.direction1 { 0 } else { 1 }] += 1;
                }
                if edge.cut2 == Some(bond) {
                    counts[if edge.direction2 { 0 } else { 1 }] += 1;
                }
            }
        }
        counts
    }

    /// Live node ids ordered by fragment key as a binary number, root
    /// last among terminal keys.
    pub fn sorted_node_list(&self) -> Vec<usize> {
        let natoms = self.mol.natoms();
        let mut ids: Vec<usize> = self.node_ids().collect();
        ids.sort_by(|&a, &b| {
            compare_keys(
                &self.nodes[a].fragment.node_key(natoms),
                &self.nodes[b].fragment.node_key(natoms),
            )
        });
        ids
    }

    /// Newick-like serialization:
    /// `(children)formula[fragmentScore,edgeScore,hydrogenCount]`, root
    /// terminated by `;`. Children appear in insertion order.
    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        self.write_newick(0, &mut out);
        out.push(';');
        out
    }

    fn write_newick(&self, id: usize, out: &mut String) {
        let node = &self.nodes[id];
        let live: Vec<usize> = node
            .children
            .iter()
            .copied()
            .filter(|&c| !self.nodes[c].removed)
            .collect();
        if !live.is_empty() {
            out.push('(');
            for (i, c) in live.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_newick(*c, out);
            }
            out.push(')');
        }
        let formula = node.fragment.formula(self.mol);
        let edge_score = node.edge.as_ref().map(|e| e.score).unwrap_or(0.0);
        out.push_str(&format!(
            "{}[{},{},{}]",
            formula,
            node.fragment_score,
            edge_score,
            formula.hydrogens()
        ));
    }

    /// JSON view of the tree (serde), children nested.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.json_node(0))
    }

    fn json_node(&self, id: usize) -> JsonNode {
        let node = &self.nodes[id];
        let formula = node.fragment.formula(self.mol);
        JsonNode {
            formula: formula.to_string(),
            fragment_score: node.fragment_score,
            edge_score: node.edge.as_ref().map(|e| e.score).unwrap_or(0.0),
            bond_breaks: node.bondbreaks,
            hydrogens: formula.hydrogens(),
            children: node
                .children
                .iter()
                .copied()
                .filter(|&c| !self.nodes[c].removed)
                .map(|c| self.json_node(c))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonNode {
    formula: String,
    fragment_score: f64,
    edge_score: f64,
    bond_breaks: u16,
    hydrogens: u32,
    children: Vec<JsonNode>,
}

/// Thrown by [`parse_newick`] on malformed input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NewickError {
    #[error("unexpected character {found:?} at byte {at}")]
    Unexpected { found: char, at: usize },
    #[error("invalid number at byte {at}")]
    BadNumber { at: usize },
    #[error("unexpected end of input")]
    Eof,
}

/// A parsed Newick tree; labels are kept as strings, the three bracket
/// fields as numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct NewickNode {
    pub label: String,
    pub fragment_score: f64,
    pub edge_score: f64,
    pub hydrogens: u32,
    pub children: Vec<NewickNode>,
}

impl NewickNode {
    /// Sum of fragment and edge scores over all non-root nodes, i.e.
    /// the [`CombinatorialSubtree::get_score`] of the serialized tree.
    pub fn tree_score(&self) -> f64 {
        fn below(node: &NewickNode) -> f64 {
            node.children
                .iter()
                .map(|c| c.fragment_score + c.edge_score + below(c))
                .sum()
        }
        below(self)
    }
}

/// Parse the output of [`CombinatorialSubtree::to_newick`].
pub fn parse_newick(input: &str) -> Result<NewickNode, NewickError> {
    let bytes = input.as_bytes();
    let mut pos = 0;
    let node = parse_node(bytes, &mut pos)?;
    match bytes.get(pos) {
        Some(b';') => Ok(node),
        Some(&c) => Err(NewickError::Unexpected {
            found: c as char,
            at: pos,
        }),
        None => Err(NewickError::Eof),
    }
}

fn parse_node(bytes: &[u8], pos: &mut usize) -> Result<NewickNode, NewickError> {
    let mut children = Vec::new();
    if bytes.get(*pos) == Some(&b'(') {
        *pos += 1;
        loop {
            children.push(parse_node(bytes, pos)?);
            match bytes.get(*pos) {
                Some(b',') => *pos += 1,
                Some(b')') => {
                    *pos += 1;
                    break;
                }
                Some(&c) => {
                    return Err(NewickError::Unexpected {
                        found: c as char,
                        at: *pos,
                    })
                }
                None => return Err(NewickError::Eof),
            }
        }
    }
    let start = *pos;
    while let Some(&c) = bytes.get(*pos) {
        if c == b'[' {
            break;
        }
        if matches!(c, b'(' | b')' | b',' | b';') {
            return Err(NewickError::Unexpected {
                found: c as char,
                at: *pos,
            });
        }
        *pos += 1;
    }
    let label = String::from_utf8_lossy(&bytes[start..*pos]).into_owned();
    expect(bytes, pos, b'[')?;
    let fragment_score = parse_number(bytes, pos)?;
    expect(bytes, pos, b',')?;
    let edge_score = parse_number(bytes, pos)?;
    expect(bytes, pos, b',')?;
    let hydrogens = parse_number(bytes, pos)? as u32;
    expect(bytes, pos, b']')?;
    Ok(NewickNode {
        label,
        fragment_score,
        edge_score,
        hydrogens,
        children,
    })
}

fn expect(bytes: &[u8], pos: &mut usize, want: u8) -> Result<(), NewickError> {
    match bytes.get(*pos) {
        Some(&c) if c == want => {
            *pos += 1;
            Ok(())
        }
        Some(&c) => Err(NewickError::Unexpected {
            found: c as char,
            at: *pos,
        }),
        None => Err(NewickError::Eof),
    }
}

fn parse_number(bytes: &[u8], pos: &mut usize) -> Result<f64, NewickError> {
    let start = *pos;
    while let Some(&c) = bytes.get(*pos) {
        if c.is_ascii_digit() || matches!(c, b'-' | b'+' | b'.' | b'e' | b'E') {
            *pos += 1;
        } else {
            break;
        }
    }
    std::str::from_utf8(&bytes[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(NewickError::BadNumber { at: start })
}
