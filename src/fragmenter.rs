//! Cut enumeration and fragmentation graph construction.
//!
//! The fragmenter owns the combinatorial step: single cuts of bridge
//! bonds and paired cuts of co-cyclic ring bonds, applied per fragment.
//! Bond classification is local to the fragment's induced subgraph, so
//! a molecule ring bond becomes singly cuttable once the ring has been
//! broken on a previous level.

use std::collections::VecDeque;

use bit_set::BitSet;
use thiserror::Error;
use tracing::debug;

use crate::{
    fragment::CombinatorialFragment,
    graph::{CombinatorialGraph, CombinatorialNode},
    molecule::MolecularGraph,
    scoring::FragmentationScoring,
};

/// Contract violations of the cut operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CutError {
    #[error("bond {bond} is not contained in the fragment")]
    BondNotInFragment { bond: usize },
    #[error("bonds {a} and {b} are not both part of ring {ring}")]
    NotCocyclic { ring: usize, a: usize, b: usize },
}

/// Inspection hook for cut enumeration: parent fragment, cut bond ids,
/// resulting fragments.
pub type CutCallback<'c> = dyn FnMut(&CombinatorialFragment, &[usize], &[CombinatorialFragment]) + 'c;

/// Decides whether a freshly created graph node gets expanded further;
/// receives the node and the current node and edge counts.
pub type NodePredicate<'p> = dyn FnMut(&CombinatorialNode, usize, usize) -> bool + 'p;

struct Cut {
    bonds: Vec<usize>,
    fragments: Vec<CombinatorialFragment>,
}

/// Enumerates cuts of a molecule and builds its fragmentation graph.
pub struct CombinatorialFragmenter<'a, S: FragmentationScoring> {
    mol: &'a MolecularGraph,
    scoring: S,
}

impl<'a, S: FragmentationScoring> CombinatorialFragmenter<'a, S> {
    pub fn new(mol: &'a MolecularGraph, scoring: S) -> Self {
        Self { mol, scoring }
    }

    pub fn molecule(&self) -> &'a MolecularGraph {
        self.mol
    }

    pub fn scoring(&self) -> &S {
        &self.scoring
    }

    /// Cut a single bond of `fragment`. Yields two fragments if the
    /// bond is a bridge within the fragment (the side keeping the
    /// bond's first endpoint comes first), or one ring-opened inner
    /// fragment if the fragment stays connected.
    pub fn cut_bond(
        &self,
        fragment: &CombinatorialFragment,
        bond: usize,
    ) -> Result<Vec<CombinatorialFragment>, CutError> {
        self.check_bond(fragment, bond)?;
        Ok(self.split(fragment, &[bond]))
    }

    /// Cut two bonds of ring `ring` at once. Both bonds must lie on the
    /// ring; the result is two fragments, or one inner fragment if
    /// another ring keeps the atoms connected.
    pub fn cut_ring(
        &self,
        fragment: &CombinatorialFragment,
        ring: usize,
        bond_a: usize,
        bond_b: usize,
    ) -> Result<Vec<CombinatorialFragment>, CutError> {
        let bonds = self.mol.ring(ring).bonds();
        if bond_a == bond_b || !bonds.contains(bond_a) || !bonds.contains(bond_b) {
            return Err(CutError::NotCocyclic {
                ring,
                a: bond_a,
                b: bond_b,
            });
        }
        self.check_bond(fragment, bond_a)?;
        self.check_bond(fragment, bond_b)?;
        Ok(self.split(fragment, &[bond_a, bond_b]))
    }

    /// Enumerate every cut of `fragment`: each bridge bond alone (in
    /// ascending bond order), then each pair of non-bridge bonds sharing
    /// a ring still intact in the fragment (in lexicographic pair
    /// order). Returns all resulting fragments in enumeration order.
    pub fn cut_all_bonds(
        &self,
        fragment: &CombinatorialFragment,
        callback: Option<&mut CutCallback>,
    ) -> Vec<CombinatorialFragment> {
        self.collect_cuts(fragment, None, callback)
    }

    /// Like [`Self::cut_all_bonds`], restricted to the bonds in `mask`.
    /// Bridge classification still considers the whole fragment.
    pub fn cut_bonds(
        &self,
        fragment: &CombinatorialFragment,
        mask: &BitSet,
        callback: Option<&mut CutCallback>,
    ) -> Vec<CombinatorialFragment> {
        self.collect_cuts(fragment, Some(mask), callback)
    }

    /// Build the full fragmentation graph by breadth-first expansion
    /// from the intact molecule. `predicate` is evaluated on every
    /// newly created node and gates its further expansion; the root is
    /// always expanded.
    pub fn create_combinatorial_fragmentation_graph(
        &self,
        predicate: &mut NodePredicate,
    ) -> CombinatorialGraph<'a> {
        self.build_graph(None, predicate)
    }

    /// Build the fragmentation graph cutting only the bonds in `mask`.
    pub fn create_fragmentation_graph_cutting_bonds(
        &self,
        mask: &BitSet,
        predicate: &mut NodePredicate,
    ) -> CombinatorialGraph<'a> {
        self.build_graph(Some(mask), predicate)
    }

    fn build_graph(
        &self,
        mask: Option<&BitSet>,
        predicate: &mut NodePredicate,
    ) -> CombinatorialGraph<'a> {
        let mut graph = CombinatorialGraph::new(self.mol);
        let mut queue = VecDeque::from([0usize]);
        while let Some(node_id) = queue.pop_front() {
            let cuts = self.enumerate_cuts(graph.node(node_id).fragment(), mask);
            for cut in cuts {
                let cut1 = cut.bonds[0];
                let cut2 = cut.bonds.get(1).copied();
                for fragment in cut.fragments {
                    let direction1 = fragment.contains(self.mol.bond_endpoints(cut1).0);
                    let direction2 = cut2
                        .map(|b| fragment.contains(self.mol.bond_endpoints(b).0))
                        .unwrap_or(false);
                    let (target, created) = graph.add_edge_to_fragment(
                        node_id,
                        fragment,
                        (cut1, cut2),
                        (direction1, direction2),
                        &self.scoring,
                    );
                    if created
                        && predicate(graph.node(target), graph.number_of_nodes(), graph.edge_count())
                    {
                        queue.push_back(target);
                    }
                }
            }
        }
        debug!(
            nodes = graph.number_of_nodes(),
            edges = graph.edge_count(),
            "fragmentation graph built"
        );
        graph
    }

    fn collect_cuts(
        &self,
        fragment: &CombinatorialFragment,
        mask: Option<&BitSet>,
        mut callback: Option<&mut CutCallback>,
    ) -> Vec<CombinatorialFragment> {
        let mut out = Vec::new();
        for cut in self.enumerate_cuts(fragment, mask) {
            if let Some(cb) = callback.as_mut() {
                cb(fragment, &cut.bonds, &cut.fragments);
            }
            out.extend(cut.fragments);
        }
        out
    }

    fn enumerate_cuts(&self, fragment: &CombinatorialFragment, mask: Option<&BitSet>) -> Vec<Cut> {
        let active: Vec<usize> = (0..self.mol.nbonds())
            .filter(|&b| {
                let (u, v) = self.mol.bond_endpoints(b);
                fragment.contains(u)
                    && fragment.contains(v)
                    && !fragment.removed_bonds().contains(b)
                    && mask.map(|m| m.contains(b)).unwrap_or(true)
            })
            .collect();

        let mut bridges = Vec::new();
        let mut cyclic = Vec::new();
        for &b in &active {
            if self.is_bridge(fragment, b) {
                bridges.push(b);
            } else {
                cyclic.push(b);
            }
        }

        let mut cuts = Vec::new();
        for &b in &bridges {
            cuts.push(Cut {
                bonds: vec![b],
                fragments: self.split(fragment, &[b]),
            });
        }
        // Pairs must share a ring that is still intact in this fragment;
        // an opened ring is a chain whose remaining bonds were classified
        // above.
        let opened = fragment.disconnected_rings();
        for (i, &a) in cyclic.iter().enumerate() {
            for &b in &cyclic[i + 1..] {
                let intact = self
                    .mol
                    .rings_of_bond(a)
                    .intersection(self.mol.rings_of_bond(b))
                    .any(|r| !opened.contains(r));
                if intact {
                    cuts.push(Cut {
                        bonds: vec![a, b],
                        fragments: self.split(fragment, &[a, b]),
                    });
                }
            }
        }
        cuts
    }

    fn check_bond(&self, fragment: &CombinatorialFragment, bond: usize) -> Result<(), CutError> {
        if bond >= self.mol.nbonds() {
            return Err(CutError::BondNotInFragment { bond });
        }
        let (u, v) = self.mol.bond_endpoints(bond);
        if fragment.contains(u) && fragment.contains(v) && !fragment.removed_bonds().contains(bond) {
            Ok(())
        } else {
            Err(CutError::BondNotInFragment { bond })
        }
    }

    /// `true` iff removing `bond` disconnects the fragment's induced
    /// subgraph.
    fn is_bridge(&self, fragment: &CombinatorialFragment, bond: usize) -> bool {
        self.reachable(fragment, &[bond]).len() < fragment.natoms()
    }

    /// Atoms reachable from the first endpoint of `skip[0]` within the
    /// fragment, with the `skip` bonds and every previously removed bond
    /// taken out.
    fn reachable(&self, fragment: &CombinatorialFragment, skip: &[usize]) -> BitSet {
        let start = self.mol.bond_endpoints(skip[0]).0;
        let mut seen = BitSet::with_capacity(self.mol.natoms());
        seen.insert(start);
        let mut queue = VecDeque::from([start]);
        while let Some(u) = queue.pop_front() {
            for &b in self.mol.incident_bonds(u) {
                if skip.contains(&b) || fragment.removed_bonds().contains(b) {
                    continue;
                }
                let (x, y) = self.mol.bond_endpoints(b);
                let w = if x == u { y } else { x };
                if fragment.contains(w) && !seen.contains(w) {
                    seen.insert(w);
                    queue.push_back(w);
                }
            }
        }
        seen
    }

    /// Apply the cut: either one ring-opened inner fragment or two
    /// disconnected fragments, the one keeping the first cut bond's
    /// first endpoint first. Rings containing any cut bond are marked
    /// as opened on every product.
    fn split(&self, fragment: &CombinatorialFragment, cut: &[usize]) -> Vec<CombinatorialFragment> {
        let mut rings = fragment.disconnected_rings().clone();
        let mut removed = fragment.removed_bonds().clone();
        for &b in cut {
            rings.union_with(self.mol.rings_of_bond(b));
            removed.insert(b);
        }

        let first = self.reachable(fragment, cut);
        if first.len() == fragment.natoms() {
            return vec![
                CombinatorialFragment::new(fragment.atoms().clone(), rings, true)
                    .with_removed_bonds(removed),
            ];
        }
        let mut second = fragment.atoms().clone();
        second.difference_with(&first);
        vec![
            CombinatorialFragment::new(first, rings.clone(), false)
                .with_removed_bonds(removed.clone()),
            CombinatorialFragment::new(second, rings, false).with_removed_bonds(removed),
        ]
    }
}
