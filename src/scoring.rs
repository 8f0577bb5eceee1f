//! Scoring models for fragmentation edges and fragments.
//!
//! Every score is a log-odds-like `f64` where larger is better; cutting
//! bonds costs, explaining an observed peak pays. The graph builder and
//! the subtree calculators only see the [`FragmentationScoring`] trait.

use crate::{
    fragment::CombinatorialFragment,
    ftree::FragmentTree,
    graph::CombinatorialNode,
    molecule::{Bond, Element, MolecularGraph},
};

/// Scores bond cuts and fragments during graph construction.
///
/// `direction` on a bond score is `true` when the surviving fragment
/// keeps the bond's first endpoint; asymmetric models can charge the two
/// loss directions differently.
pub trait FragmentationScoring {
    fn score_bond(&self, bond: usize, direction: bool) -> f64;

    fn score_fragment(&self, fragment: &CombinatorialFragment, depth: u16) -> f64;

    /// Score of the edge from `source` to the freshly cut `target`.
    /// Defaults to the sum of the cut bond scores.
    fn score_edge(
        &self,
        source: &CombinatorialNode,
        target: &CombinatorialFragment,
        cut1: usize,
        cut2: Option<usize>,
        direction1: bool,
        direction2: bool,
    ) -> f64 {
        let _ = (source, target);
        let mut score = self.score_bond(cut1, direction1);
        if let Some(cut2) = cut2 {
            score += self.score_bond(cut2, direction2);
        }
        score
    }
}

/// Charges every cut bond the same constant and gives fragments no
/// intrinsic score. The constant defaults to -1.
#[derive(Debug, Copy, Clone)]
pub struct UniformBondScoring {
    bond_score: f64,
}

impl UniformBondScoring {
    pub fn new(bond_score: f64) -> Self {
        Self { bond_score }
    }
}

impl Default for UniformBondScoring {
    fn default() -> Self {
        Self { bond_score: -1.0 }
    }
}

impl FragmentationScoring for UniformBondScoring {
    fn score_bond(&self, _bond: usize, _direction: bool) -> f64 {
        self.bond_score
    }

    fn score_fragment(&self, _fragment: &CombinatorialFragment, _depth: u16) -> f64 {
        0.0
    }
}

/// Directed bond-cleavage scores, `(kept element, lost element, bond)`.
/// Pairs not in the table fall back to [`BondTypeScoring::WILDCARD`].
#[rustfmt::skip]
const BOND_SCORES: &[(Element, Element, Bond, f64)] = &[
    (Element::C, Element::C, Bond::Single,    -0.874),
    (Element::C, Element::C, Bond::Double,    -1.474),
    (Element::C, Element::C, Bond::Triple,    -2.073),
    (Element::C, Element::C, Bond::Aromatic,  -1.672),
    (Element::C, Element::O, Bond::Single,    -0.542),
    (Element::O, Element::C, Bond::Single,    -0.942),
    (Element::C, Element::O, Bond::Double,    -1.240),
    (Element::O, Element::C, Bond::Double,    -1.540),
    (Element::C, Element::N, Bond::Single,    -0.663),
    (Element::N, Element::C, Bond::Single,    -0.965),
    (Element::C, Element::N, Bond::Double,    -1.362),
    (Element::N, Element::C, Bond::Double,    -1.662),
    (Element::C, Element::N, Bond::Aromatic,  -1.563),
    (Element::N, Element::C, Bond::Aromatic,  -1.763),
    (Element::C, Element::S, Bond::Single,    -0.612),
    (Element::S, Element::C, Bond::Single,    -0.812),
    (Element::C, Element::F, Bond::Single,    -1.120),
    (Element::C, Element::Cl, Bond::Single,   -0.741),
    (Element::C, Element::Br, Bond::Single,   -0.538),
    (Element::C, Element::I, Bond::Single,    -0.437),
    (Element::C, Element::P, Bond::Single,    -0.893),
    (Element::P, Element::O, Bond::Single,    -0.998),
    (Element::O, Element::P, Bond::Single,    -0.798),
    (Element::N, Element::N, Bond::Single,    -1.051),
    (Element::O, Element::O, Bond::Single,    -0.481),
];

/// Element-pair bond scoring. Per-bond directed scores are precomputed
/// from [`BOND_SCORES`] at construction, so lookups during enumeration
/// are two array reads.
#[derive(Debug, Clone)]
pub struct BondTypeScoring {
    // (kept-first-endpoint, kept-second-endpoint) per bond index.
    scores: Vec<(f64, f64)>,
}

impl BondTypeScoring {
    /// Score of a cleavage not covered by the table.
    pub const WILDCARD: f64 = -0.301;

    pub fn new(mol: &MolecularGraph) -> Self {
        let lookup = |kept: Element, lost: Element, bond: Bond| {
            BOND_SCORES
                .iter()
                .find(|(k, l, b, _)| *k == kept && *l == lost && *b == bond)
                .map(|(_, _, _, s)| *s)
                .unwrap_or(Self::WILDCARD)
        };
        let scores = (0..mol.nbonds())
            .map(|i| {
                let (u, v) = mol.bond_endpoints(i);
                let (eu, ev) = (mol.atom(u).element(), mol.atom(v).element());
                let bond = mol.bond(i);
                (lookup(eu, ev, bond), lookup(ev, eu, bond))
            })
            .collect();
        Self { scores }
    }
}

impl FragmentationScoring for BondTypeScoring {
    fn score_bond(&self, bond: usize, direction: bool) -> f64 {
        let (first, second) = self.scores[bond];
        if direction {
            first
        } else {
            second
        }
    }

    fn score_fragment(&self, _fragment: &CombinatorialFragment, _depth: u16) -> f64 {
        0.0
    }
}

/// Bond scoring plus prizes for fragments whose heavy-atom skeleton
/// occurs in a reference [`FragmentTree`], with hydrogen differences
/// charged as rearrangements.
pub struct AnnotatedPeakScoring<'a> {
    mol: &'a MolecularGraph,
    tree: &'a FragmentTree,
    bonds: BondTypeScoring,
}

impl<'a> AnnotatedPeakScoring<'a> {
    /// Penalty per rearranged hydrogen.
    pub const REARRANGEMENT_SCORE: f64 = -0.25;
    /// Prize for explaining an observed peak.
    pub const PEAK_SCORE: f64 = 6.0;
    /// Penalty per fragmentation level for ring-opened intermediates.
    pub const DEPTH_PENALTY: f64 = -0.05;

    pub fn new(mol: &'a MolecularGraph, tree: &'a FragmentTree) -> Self {
        Self {
            mol,
            tree,
            bonds: BondTypeScoring::new(mol),
        }
    }

    fn matching_peak(&self, fragment: &CombinatorialFragment) -> Option<(i64, f64)> {
        if fragment.is_inner_node() {
            return None;
        }
        let formula = fragment.formula(self.mol);
        self.tree
            .fragments()
            .iter()
            .filter(|peak| peak.formula().same_skeleton(&formula))
            .map(|peak| (formula.hydrogen_difference(peak.formula()), peak.intensity()))
            .min_by(|a, b| a.0.abs().cmp(&b.0.abs()))
    }
}

impl FragmentationScoring for AnnotatedPeakScoring<'_> {
    fn score_bond(&self, bond: usize, direction: bool) -> f64 {
        self.bonds.score_bond(bond, direction)
    }

    fn score_fragment(&self, fragment: &CombinatorialFragment, depth: u16) -> f64 {
        if fragment.is_inner_node() {
            return depth as f64 * Self::DEPTH_PENALTY;
        }
        match self.matching_peak(fragment) {
            Some((_, intensity)) => Self::PEAK_SCORE + intensity,
            None => 0.0,
        }
    }

    fn score_edge(
        &self,
        _source: &CombinatorialNode,
        target: &CombinatorialFragment,
        cut1: usize,
        cut2: Option<usize>,
        direction1: bool,
        direction2: bool,
    ) -> f64 {
        let mut score = self.score_bond(cut1, direction1);
        if let Some(cut2) = cut2 {
            score += self.score_bond(cut2, direction2);
        }
        if let Some((dh, _)) = self.matching_peak(target) {
            score += Self::REARRANGEMENT_SCORE * dh.unsigned_abs() as f64;
        }
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::molecule::Atom;
    use bit_set::BitSet;

    fn ethanol() -> MolecularGraph {
        MolecularGraph::new(
            vec![
                Atom::new(Element::C, 3),
                Atom::new(Element::C, 2),
                Atom::new(Element::O, 1),
            ],
            vec![(0, 1, Bond::Single), (1, 2, Bond::Single)],
        )
    }

    #[test]
    fn uniform_scoring_charges_every_bond_the_same() {
        let scoring = UniformBondScoring::default();
        assert_eq!(scoring.score_bond(0, true), -1.0);
        assert_eq!(scoring.score_bond(7, false), -1.0);
    }

    #[test]
    fn bond_type_scoring_is_directed() {
        let mol = ethanol();
        let scoring = BondTypeScoring::new(&mol);
        // C-C is symmetric, C-O is not.
        assert_eq!(scoring.score_bond(0, true), scoring.score_bond(0, false));
        assert_eq!(scoring.score_bond(1, true), -0.542);
        assert_eq!(scoring.score_bond(1, false), -0.942);
    }

    #[test]
    fn peak_scoring_pays_matching_terminals_only() {
        let mol = ethanol();
        let mut tree = FragmentTree::new("C2H6O".parse().unwrap());
        tree.add_child(0, "CH4O".parse().unwrap(), 0.5);
        let scoring = AnnotatedPeakScoring::new(&mol, &tree);

        let matching =
            CombinatorialFragment::new(BitSet::from_iter([1, 2]), BitSet::new(), false);
        assert_eq!(
            scoring.score_fragment(&matching, 1),
            AnnotatedPeakScoring::PEAK_SCORE + 0.5
        );

        let unmatched = CombinatorialFragment::new(BitSet::from_iter([2]), BitSet::new(), false);
        assert_eq!(scoring.score_fragment(&unmatched, 1), 0.0);

        let inner = CombinatorialFragment::new(BitSet::from_iter([0, 1, 2]), BitSet::new(), true);
        assert_eq!(
            scoring.score_fragment(&inner, 2),
            2.0 * AnnotatedPeakScoring::DEPTH_PENALTY
        );
    }
}
