//! Fragments of a molecule as atom bitsets.

use bit_set::BitSet;

use crate::{
    formula::MolecularFormula,
    molecule::{Element, MolecularGraph},
};

/// A connected induced subgraph of a molecule, identified by its atom
/// bitset. Inner nodes additionally record which rings were opened to
/// reach them without losing atoms; those ring ids distinguish them from
/// the terminal fragment over the same atoms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinatorialFragment {
    bitset: BitSet,
    disconnected_rings: BitSet,
    removed_bonds: BitSet,
    inner_node: bool,
}

impl CombinatorialFragment {
    pub fn new(bitset: BitSet, disconnected_rings: BitSet, inner_node: bool) -> Self {
        Self {
            bitset,
            disconnected_rings,
            removed_bonds: BitSet::new(),
            inner_node,
        }
    }

    pub(crate) fn with_removed_bonds(mut self, removed_bonds: BitSet) -> Self {
        self.removed_bonds = removed_bonds;
        self
    }

    /// Atoms of this fragment, as indices into the parent molecule.
    pub fn atoms(&self) -> &BitSet {
        &self.bitset
    }

    /// Rings of the parent molecule that were opened by cuts producing
    /// this fragment.
    pub fn disconnected_rings(&self) -> &BitSet {
        &self.disconnected_rings
    }

    /// Bonds severed by the cuts that produced this fragment; both
    /// endpoints may survive, the bond is gone from the induced
    /// subgraph regardless. Not part of the node identity.
    pub fn removed_bonds(&self) -> &BitSet {
        &self.removed_bonds
    }

    /// `true` for ring-opened fragments that kept every atom of their
    /// parent; such nodes never match an observed formula.
    pub fn is_inner_node(&self) -> bool {
        self.inner_node
    }

    pub fn natoms(&self) -> usize {
        self.bitset.len()
    }

    pub fn contains(&self, atom: usize) -> bool {
        self.bitset.contains(atom)
    }

    /// Identity key for graph deduplication: the atom bits, plus marker
    /// bits above the molecule's atom count for each opened ring of an
    /// inner node. Terminal fragments over the same atoms therefore get
    /// a different key than their ring-opened counterparts.
    pub(crate) fn node_key(&self, natoms: usize) -> BitSet {
        let mut key = self.bitset.clone();
        if self.inner_node {
            for r in self.disconnected_rings.iter() {
                key.insert(natoms + r);
            }
        }
        key
    }

    /// Molecular formula of this fragment, implicit hydrogens included.
    pub fn formula(&self, mol: &MolecularGraph) -> MolecularFormula {
        let mut formula = MolecularFormula::new();
        for atom in self.bitset.iter() {
            let a = mol.atom(atom);
            formula.add(a.element(), 1);
            formula.add(Element::H, a.hydrogens() as u32);
        }
        formula
    }

    /// Signed hydrogen difference between this fragment and a target
    /// formula with the same heavy-atom skeleton.
    pub fn hydrogen_rearrangements(&self, mol: &MolecularGraph, target: &MolecularFormula) -> i64 {
        self.formula(mol).hydrogen_difference(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::molecule::{Atom, Bond};

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
    fn fragment_formula_sums_hydrogens() {
        let mol = ethanol();
        let frag = CombinatorialFragment::new(BitSet::from_iter([1, 2]), BitSet::new(), false);
        assert_eq!(frag.formula(&mol).to_string(), "CH3O");
        assert_eq!(frag.natoms(), 2);
        assert!(frag.contains(2) && !frag.contains(0));
    }

    #[test]
    fn inner_node_key_differs_from_terminal_key() {
        let atoms = BitSet::from_iter([0, 1, 2]);
        let mut rings = BitSet::new();
        rings.insert(0);
        let inner = CombinatorialFragment::new(atoms.clone(), rings.clone(), true);
        let terminal = CombinatorialFragment::new(atoms.clone(), rings, false);
        assert_ne!(inner.node_key(3), terminal.node_key(3));
        assert_eq!(terminal.node_key(3), atoms);
    }

    #[test]
    fn rearrangement_is_signed() {
        let mol = ethanol();
        let frag = mol.as_fragment();
        let target: MolecularFormula = "C2H4O".parse().unwrap();
        assert_eq!(frag.hydrogen_rearrangements(&mol, &target), 2);
    }
}
