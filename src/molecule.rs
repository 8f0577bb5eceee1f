//! Graph-theoretic representation of a molecule.
//!
//! A [`MolecularGraph`] is a petgraph-backed atom/bond graph enriched with
//! the indexed views the fragmenter works on: bond endpoints by bond
//! index, incident-bond lists per atom, and perceived rings (a greedy
//! linearly independent basis of shortest cycles). The fragmenter never
//! interprets chemistry beyond connectivity; elements and hydrogen counts
//! exist so fragments can report formulas.

use std::{collections::VecDeque, fmt, str::FromStr};

use bit_set::BitSet;
use petgraph::{
    graph::{Graph, NodeIndex},
    Undirected,
};

use crate::{formula::MolecularFormula, fragment::CombinatorialFragment};

pub(crate) type Index = u32;
pub(crate) type MGraph = Graph<Atom, Bond, Undirected, Index>;

/// Thrown by [`Element::from_str`] if the string does not represent a
/// supported chemical element.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ParseElementError;

macro_rules! element_table {
    ( $(($element:ident, $name:literal, $valence:literal),)* ) => {
        /// A chemical element, restricted to the organic subset the bond
        /// scoring tables know about.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum Element {
            $( $element, )*
        }

        impl Element {
            /// Default valence, used to derive implicit hydrogen counts.
            pub fn valence(&self) -> u32 {
                match self {
                    $( Element::$element => $valence, )*
                }
            }
        }

        impl fmt::Display for Element {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $( Element::$element => write!(f, "{}", $name), )*
                }
            }
        }

        impl FromStr for Element {
            type Err = ParseElementError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $name => Ok(Element::$element), )*
                    _ => Err(ParseElementError),
                }
            }
        }
    };
}

element_table!(
    (H, "H", 1),
    (B, "B", 3),
    (C, "C", 4),
    (N, "N", 3),
    (O, "O", 2),
    (F, "F", 1),
    (Si, "Si", 4),
    (P, "P", 3),
    (S, "S", 2),
    (Cl, "Cl", 1),
    (Se, "Se", 2),
    (Br, "Br", 1),
    (I, "I", 1),
);

/// The nodes of a [`MolecularGraph`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Atom {
    element: Element,
    hydrogens: u8,
}

impl Atom {
    pub fn new(element: Element, hydrogens: u8) -> Self {
        Self { element, hydrogens }
    }

    pub fn element(&self) -> Element {
        self.element
    }

    /// Implicit hydrogens attached to this heavy atom.
    pub fn hydrogens(&self) -> u8 {
        self.hydrogens
    }
}

/// The edges of a [`MolecularGraph`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bond {
    Single,
    Double,
    Triple,
    Aromatic,
}

impl Bond {
    /// Nominal bond order; aromatic counts as 1.5.
    pub fn order(&self) -> f64 {
        match self {
            Bond::Single => 1.0,
            Bond::Double => 2.0,
            Bond::Triple => 3.0,
            Bond::Aromatic => 1.5,
        }
    }
}

/// Thrown by [`Bond::try_from`] for orders outside 1-4.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ParseBondError;

impl TryFrom<usize> for Bond {
    type Error = ParseBondError;
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Bond::Single),
            2 => Ok(Bond::Double),
            3 => Ok(Bond::Triple),
            4 => Ok(Bond::Aromatic),
            _ => Err(ParseBondError),
        }
    }
}

/// A perceived ring: the bonds forming the cycle and the atoms on it.
#[derive(Debug, Clone)]
pub struct Ring {
    bonds: BitSet,
    atoms: BitSet,
}

impl Ring {
    pub fn bonds(&self) -> &BitSet {
        &self.bonds
    }

    pub fn atoms(&self) -> &BitSet {
        &self.atoms
    }

    pub fn size(&self) -> usize {
        self.bonds.len()
    }
}

/// A molecule with indexed bonds and perceived rings.
#[derive(Debug, Clone)]
pub struct MolecularGraph {
    graph: MGraph,
    bonds: Vec<(usize, usize)>,
    bond_types: Vec<Bond>,
    incident: Vec<Vec<usize>>,
    rings: Vec<Ring>,
    bond_rings: Vec<BitSet>,
    formula: MolecularFormula,
}

impl MolecularGraph {
    /// Build a molecule from atoms and `(endpoint, endpoint, bond)`
    /// triples. Bond indices follow the order of `bonds`.
    pub fn new(atoms: Vec<Atom>, bonds: Vec<(usize, usize, Bond)>) -> Self {
        let mut graph = MGraph::default();
        let node_ids: Vec<NodeIndex<Index>> = atoms.iter().map(|a| graph.add_node(*a)).collect();

        let mut endpoints = Vec::with_capacity(bonds.len());
        let mut bond_types = Vec::with_capacity(bonds.len());
        let mut incident = vec![Vec::new(); atoms.len()];
        for (i, (u, v, bond)) in bonds.iter().enumerate() {
            graph.add_edge(node_ids[*u], node_ids[*v], *bond);
            endpoints.push((*u, *v));
            bond_types.push(*bond);
            incident[*u].push(i);
            incident[*v].push(i);
        }

        let rings = perceive_rings(atoms.len(), &endpoints, &incident);
        let mut bond_rings = vec![BitSet::new(); endpoints.len()];
        for (r, ring) in rings.iter().enumerate() {
            for b in ring.bonds.iter() {
                bond_rings[b].insert(r);
            }
        }

        let mut formula = MolecularFormula::new();
        for atom in &atoms {
            formula.add(atom.element(), 1);
            formula.add(Element::H, atom.hydrogens() as u32);
        }

        Self {
            graph,
            bonds: endpoints,
            bond_types,
            incident,
            rings,
            bond_rings,
            formula,
        }
    }

    pub fn natoms(&self) -> usize {
        self.graph.node_count()
    }

    pub fn nbonds(&self) -> usize {
        self.bonds.len()
    }

    pub fn atom(&self, i: usize) -> &Atom {
        &self.graph[NodeIndex::new(i)]
    }

    pub fn bond(&self, i: usize) -> Bond {
        self.bond_types[i]
    }

    /// Endpoint atom indices of bond `i`, in input order. The first
    /// endpoint defines the direction of a cut.
    pub fn bond_endpoints(&self, i: usize) -> (usize, usize) {
        self.bonds[i]
    }

    /// Bond indices incident to atom `i`.
    pub fn incident_bonds(&self, i: usize) -> &[usize] {
        &self.incident[i]
    }

    pub fn formula(&self) -> &MolecularFormula {
        &self.formula
    }

    /// The whole molecule as a fragment: all atoms, no rings opened.
    pub fn as_fragment(&self) -> CombinatorialFragment {
        let mut bitset = BitSet::with_capacity(self.natoms() + self.num_rings());
        for i in 0..self.natoms() {
            bitset.insert(i);
        }
        CombinatorialFragment::new(bitset, BitSet::new(), false)
    }

    pub fn num_rings(&self) -> usize {
        self.rings.len()
    }

    pub fn ring(&self, r: usize) -> &Ring {
        &self.rings[r]
    }

    pub fn is_ring_bond(&self, bond: usize) -> bool {
        !self.bond_rings[bond].is_empty()
    }

    /// Ring ids containing bond `bond`.
    pub fn rings_of_bond(&self, bond: usize) -> &BitSet {
        &self.bond_rings[bond]
    }

    /// The lowest ring id containing both bonds, if any.
    pub fn shared_ring(&self, bond_a: usize, bond_b: usize) -> Option<usize> {
        self.bond_rings[bond_a]
            .intersection(&self.bond_rings[bond_b])
            .next()
    }
}

/// Perceive a greedy, linearly independent basis of shortest cycles.
///
/// Candidate rings are the shortest cycle through each bond (BFS with
/// that bond removed); candidates are kept smallest-first while they stay
/// XOR-independent over the bond space, until the cyclomatic number
/// `e - v + c` is reached.
fn perceive_rings(natoms: usize, bonds: &[(usize, usize)], incident: &[Vec<usize>]) -> Vec<Ring> {
    if natoms == 0 {
        return Vec::new();
    }

    let mut seen = vec![false; natoms];
    let mut components = 0;
    for start in 0..natoms {
        if seen[start] {
            continue;
        }
        components += 1;
        seen[start] = true;
        let mut queue = VecDeque::from([start]);
        while let Some(u) = queue.pop_front() {
            for &b in &incident[u] {
                let (x, y) = bonds[b];
                let w = if x == u { y } else { x };
                if !seen[w] {
                    seen[w] = true;
                    queue.push_back(w);
                }
            }
        }
    }

    let expected = (bonds.len() + components).saturating_sub(natoms);
    if expected == 0 {
        return Vec::new();
    }

    // Shortest cycle through each bond: BFS from one endpoint to the
    // other with the bond itself removed.
    let mut candidates: Vec<BitSet> = Vec::new();
    for (skip, &(u, v)) in bonds.iter().enumerate() {
        let mut prev: Vec<Option<(usize, usize)>> = vec![None; natoms];
        let mut visited = vec![false; natoms];
        visited[u] = true;
        let mut queue = VecDeque::from([u]);
        'bfs: while let Some(x) = queue.pop_front() {
            for &b in &incident[x] {
                if b == skip {
                    continue;
                }
                let (p, q) = bonds[b];
                let y = if p == x { q } else { p };
                if !visited[y] {
                    visited[y] = true;
                    prev[y] = Some((x, b));
                    if y == v {
                        break 'bfs;
                    }
                    queue.push_back(y);
                }
            }
        }
        if visited[v] {
            let mut ring = BitSet::new();
            ring.insert(skip);
            let mut cur = v;
            while let Some((parent, bond)) = prev[cur] {
                ring.insert(bond);
                cur = parent;
            }
            candidates.push(ring);
        }
    }

    candidates.sort_by(|a, b| {
        a.len()
            .cmp(&b.len())
            .then_with(|| a.iter().collect::<Vec<_>>().cmp(&b.iter().collect()))
    });
    candidates.dedup();

    // Greedy Gaussian elimination over GF(2), one word-vector per ring.
    let words = bonds.len().div_ceil(64);
    let to_words = |bs: &BitSet| {
        let mut w = vec![0u64; words];
        for b in bs.iter() {
            w[b / 64] |= 1 << (b % 64);
        }
        w
    };
    let mut basis: Vec<Vec<u64>> = Vec::with_capacity(expected);
    let mut rings = Vec::with_capacity(expected);
    for ring_bonds in candidates {
        if rings.len() >= expected {
            break;
        }
        let mut bv = to_words(&ring_bonds);
        for row in &basis {
            let pivot = row
                .iter()
                .enumerate()
                .find(|(_, w)| **w != 0)
                .map(|(i, w)| i * 64 + w.trailing_zeros() as usize);
            if let Some(p) = pivot {
                if bv[p / 64] & (1 << (p % 64)) != 0 {
                    for (a, b) in bv.iter_mut().zip(row.iter()) {
                        *a ^= *b;
                    }
                }
            }
        }
        if bv.iter().all(|w| *w == 0) {
            continue;
        }
        basis.push(bv);
        let mut atoms = BitSet::new();
        for b in ring_bonds.iter() {
            atoms.insert(bonds[b].0);
            atoms.insert(bonds[b].1);
        }
        rings.push(Ring {
            bonds: ring_bonds,
            atoms,
        });
    }
    rings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cyclopropane() -> MolecularGraph {
        MolecularGraph::new(
            vec![Atom::new(Element::C, 2); 3],
            vec![
                (0, 1, Bond::Single),
                (1, 2, Bond::Single),
                (2, 0, Bond::Single),
            ],
        )
    }

    #[test]
    fn element_round_trip() {
        assert_eq!(Element::Cl.to_string(), "Cl");
        assert_eq!("Cl".parse(), Ok(Element::Cl));
        assert!("Xx".parse::<Element>().is_err());
    }

    #[test]
    fn cyclopropane_has_one_ring() {
        let mol = cyclopropane();
        assert_eq!(mol.num_rings(), 1);
        assert_eq!(mol.ring(0).size(), 3);
        for b in 0..3 {
            assert!(mol.is_ring_bond(b));
        }
        assert_eq!(mol.shared_ring(0, 2), Some(0));
    }

    #[test]
    fn chain_has_no_rings() {
        let mol = MolecularGraph::new(
            vec![
                Atom::new(Element::C, 3),
                Atom::new(Element::C, 2),
                Atom::new(Element::O, 1),
            ],
            vec![(0, 1, Bond::Single), (1, 2, Bond::Single)],
        );
        assert_eq!(mol.num_rings(), 0);
        assert!(!mol.is_ring_bond(0));
        assert_eq!(mol.shared_ring(0, 1), None);
        assert_eq!(mol.formula().to_string(), "C2H6O");
    }

    #[test]
    fn fused_bicycle_has_two_rings() {
        // Naphthalene skeleton, carbons only.
        let mut bonds = Vec::new();
        for i in 0..9 {
            bonds.push((i, i + 1, Bond::Aromatic));
        }
        bonds.push((9, 0, Bond::Aromatic));
        bonds.push((4, 9, Bond::Aromatic));
        let mol = MolecularGraph::new(vec![Atom::new(Element::C, 1); 10], bonds);
        assert_eq!(mol.num_rings(), 2);
        assert_eq!(mol.ring(0).size(), 6);
        assert_eq!(mol.ring(1).size(), 6);
        // The fusion bond belongs to both rings.
        assert_eq!(mol.rings_of_bond(10).len(), 2);
    }

    #[test]
    fn whole_molecule_fragment_covers_all_atoms() {
        let mol = cyclopropane();
        let root = mol.as_fragment();
        assert_eq!(root.natoms(), 3);
        assert!(!root.is_inner_node());
    }
}
