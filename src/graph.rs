//! The combinatorial fragmentation graph.
//!
//! An arena DAG over deduplicated fragments. Node 0 is always the root
//! (the intact molecule); nodes and edges refer to each other by index.
//! Construction lives in the fragmenter; this module owns the score
//! bookkeeping, node ordering and pruning.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use bit_set::BitSet;

use crate::{
    fragment::CombinatorialFragment, molecule::MolecularGraph, scoring::FragmentationScoring,
};

/// A node of the fragmentation graph.
///
/// `total_score` is the best sum of edge scores over any root path;
/// `score` is the node's fragment score plus the score of the edge on
/// the current best path. Both are maintained incrementally as edges
/// are merged in.
#[derive(Debug, Clone)]
pub struct CombinatorialNode {
    fragment: CombinatorialFragment,
    depth: u16,
    bondbreaks: u16,
    fragment_score: f64,
    score: f64,
    total_score: f64,
    incoming: Vec<usize>,
    outgoing: Vec<usize>,
}

impl CombinatorialNode {
    pub fn fragment(&self) -> &CombinatorialFragment {
        &self.fragment
    }

    /// Fewest fragmentation steps from the root to this node.
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Fewest cut bonds over any root path.
    pub fn bondbreaks(&self) -> u16 {
        self.bondbreaks
    }

    pub fn fragment_score(&self) -> f64 {
        self.fragment_score
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn total_score(&self) -> f64 {
        self.total_score
    }

    pub fn incoming(&self) -> &[usize] {
        &self.incoming
    }

    pub fn outgoing(&self) -> &[usize] {
        &self.outgoing
    }
}

/// A directed edge recording which bond(s) were cut and which side of
/// each bond the target fragment kept.
#[derive(Debug, Clone)]
pub struct CombinatorialEdge {
    source: usize,
    target: usize,
    cut1: usize,
    cut2: Option<usize>,
    direction1: bool,
    direction2: bool,
    score: f64,
}

impl CombinatorialEdge {
    pub fn source(&self) -> usize {
        self.source
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn cut1(&self) -> usize {
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

/// Order two fragment keys as binary numbers (highest set bit decides).
pub(crate) fn compare_keys(a: &BitSet, b: &BitSet) -> Ordering {
    let mut diff = a.clone();
    diff.symmetric_difference_with(b);
    match diff.iter().last() {
        None => Ordering::Equal,
        Some(bit) => {
            if a.contains(bit) {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
    }
}

/// The deduplicated DAG of all enumerated fragments of one molecule.
pub struct CombinatorialGraph<'a> {
    mol: &'a MolecularGraph,
    nodes: Vec<CombinatorialNode>,
    edges: Vec<CombinatorialEdge>,
    node_ids: HashMap<BitSet, usize>,
}

impl<'a> CombinatorialGraph<'a> {
    /// A graph holding only the root fragment.
    pub(crate) fn new(mol: &'a MolecularGraph) -> Self {
        let root = mol.as_fragment();
        let key = root.node_key(mol.natoms());
        let mut node_ids = HashMap::new();
        node_ids.insert(key, 0);
        Self {
            mol,
            nodes: vec![CombinatorialNode {
                fragment: root,
                depth: 0,
                bondbreaks: 0,
                fragment_score: 0.0,
                score: 0.0,
                total_score: 0.0,
                incoming: Vec::new(),
                outgoing: Vec::new(),
            }],
            edges: Vec::new(),
            node_ids,
        }
    }

    pub fn molecule(&self) -> &'a MolecularGraph {
        self.mol
    }

    pub fn root(&self) -> &CombinatorialNode {
        &self.nodes[0]
    }

    pub fn node(&self, id: usize) -> &CombinatorialNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[CombinatorialNode] {
        &self.nodes
    }

    pub fn edge(&self, id: usize) -> &CombinatorialEdge {
        &self.edges[id]
    }

    pub fn edges(&self) -> &[CombinatorialEdge] {
        &self.edges
    }

    /// Node count, root included.
    pub fn number_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes_without_root(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node_id(&self, fragment: &CombinatorialFragment) -> Option<usize> {
        self.node_ids
            .get(&fragment.node_key(self.mol.natoms()))
            .copied()
    }

    /// Merge an edge from `parent` to `fragment`, creating the target
    /// node if its key is unseen. Returns the target node id and
    /// whether it was newly created.
    pub(crate) fn add_edge_to_fragment<S: FragmentationScoring>(
        &mut self,
        parent: usize,
        fragment: CombinatorialFragment,
        cuts: (usize, Option<usize>),
        directions: (bool, bool),
        scoring: &S,
    ) -> (usize, bool) {
        let (cut1, cut2) = cuts;
        let (direction1, direction2) = directions;
        let ncuts = 1 + cut2.is_some() as u16;
        let edge_score =
            scoring.score_edge(&self.nodes[parent], &fragment, cut1, cut2, direction1, direction2);
        let key = fragment.node_key(self.mol.natoms());

        let (target, created) = match self.node_ids.get(&key) {
            Some(&id) => (id, false),
            None => {
                let id = self.nodes.len();
                let depth = self.nodes[parent].depth + 1;
                let fragment_score = scoring.score_fragment(&fragment, depth);
                self.nodes.push(CombinatorialNode {
                    fragment,
                    depth,
                    bondbreaks: self.nodes[parent].bondbreaks + ncuts,
                    fragment_score,
                    score: fragment_score + edge_score,
                    total_score: self.nodes[parent].total_score + edge_score,
                    incoming: Vec::new(),
                    outgoing: Vec::new(),
                });
                self.node_ids.insert(key, id);
                (id, true)
            }
        };

        let edge_id = self.edges.len();
        self.edges.push(CombinatorialEdge {
            source: parent,
            target,
            cut1,
            cut2,
            direction1,
            direction2,
            score: edge_score,
        });
        self.nodes[parent].outgoing.push(edge_id);
        self.nodes[target].incoming.push(edge_id);

        if !created {
            let via_depth = self.nodes[parent].depth + 1;
            let via_breaks = self.nodes[parent].bondbreaks + ncuts;
            let t = &mut self.nodes[target];
            t.depth = t.depth.min(via_depth);
            t.bondbreaks = t.bondbreaks.min(via_breaks);
            self.relax(edge_id);
        }
        (target, created)
    }

    /// Strict relaxation of one edge, with BFS propagation of improved
    /// total scores to descendants.
    fn relax(&mut self, edge_id: usize) {
        let mut queue = VecDeque::from([edge_id]);
        while let Some(e) = queue.pop_front() {
            let (source, target, escore) = {
                let edge = &self.edges[e];
                (edge.source, edge.target, edge.score)
            };
            let candidate = self.nodes[source].total_score + escore;
            if candidate > self.nodes[target].total_score {
                let fragment_score = self.nodes[target].fragment_score;
                let t = &mut self.nodes[target];
                t.total_score = candidate;
                t.score = fragment_score + escore;
                queue.extend(self.nodes[target].outgoing.iter().copied());
            }
        }
    }

    /// Node ids ordered by their fragment key read as a binary number;
    /// the root (all atom bits set) comes last among terminal keys.
    pub fn sorted_node_list(&self) -> Vec<usize> {
        let natoms = self.mol.natoms();
        let mut ids: Vec<usize> = (0..self.nodes.len()).collect();
        ids.sort_by(|&a, &b| {
            compare_keys(
                &self.nodes[a].fragment.node_key(natoms),
                &self.nodes[b].fragment.node_key(natoms),
            )
        });
        ids
    }

    /// Dense matrix over [`Self::sorted_node_list`] order: entry
    /// `(i, j)` is `edge.score + fragment_score(j)` for an edge from
    /// node `i` to node `j` (the best such edge if several exist),
    /// negative infinity where no edge exists.
    pub fn adjacency_matrix(&self) -> Vec<Vec<f64>> {
        let order = self.sorted_node_list();
        let mut position = vec![0usize; self.nodes.len()];
        for (pos, &id) in order.iter().enumerate() {
            position[id] = pos;
        }
        let n = self.nodes.len();
        let mut matrix = vec![vec![f64::NEG_INFINITY; n]; n];
        for edge in &self.edges {
            let (i, j) = (position[edge.source], position[edge.target]);
            let entry = edge.score + self.nodes[edge.target].fragment_score;
            if entry > matrix[i][j] {
                matrix[i][j] = entry;
            }
        }
        matrix
    }

    /// Edge ids from `node` up to the root, following at each step the
    /// incoming edge whose source has the best total score (ties: the
    /// lowest source id).
    pub fn optimal_path_to_root(&self, node: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = node;
        while current != 0 {
            let best = self.nodes[current]
                .incoming
                .iter()
                .copied()
                .min_by(|&a, &b| {
                    let (sa, sb) = (self.edges[a].source, self.edges[b].source);
                    self.nodes[sb]
                        .total_score
                        .total_cmp(&self.nodes[sa].total_score)
                        .then(sa.cmp(&sb))
                });
            match best {
                Some(e) => {
                    path.push(e);
                    current = self.edges[e].source;
                }
                None => break,
            }
        }
        path
    }

    /// Drop every edge that does not lie on some optimal root path,
    /// keeping exactly the incoming edges `e` of each node `v` with
    /// `total_score(source(e)) + score(e) == total_score(v)`.
    pub fn prune_longer_paths(&mut self) {
        let kept: Vec<usize> = (0..self.edges.len())
            .filter(|&e| {
                let edge = &self.edges[e];
                self.nodes[edge.source].total_score + edge.score
                    == self.nodes[edge.target].total_score
            })
            .collect();
        let mut edges = Vec::with_capacity(kept.len());
        for node in &mut self.nodes {
            node.incoming.clear();
            node.outgoing.clear();
        }
        for e in kept {
            let edge = self.edges[e].clone();
            let id = edges.len();
            self.nodes[edge.source].outgoing.push(id);
            self.nodes[edge.target].incoming.push(id);
            edges.push(edge);
        }
        self.edges = edges;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_comparison_reads_bitsets_as_numbers() {
        let low = BitSet::from_iter([0, 1]);
        let high = BitSet::from_iter([2]);
        assert_eq!(compare_keys(&low, &high), Ordering::Less);
        assert_eq!(compare_keys(&high, &low), Ordering::Greater);
        assert_eq!(compare_keys(&low, &low.clone()), Ordering::Equal);
    }
}
