//! Subtree extraction, pruning and serialization fixtures.

use std::collections::{HashMap, HashSet};

use bit_set::BitSet;

use fragtree::{
    calculator::SubtreeCalculator,
    critical_path::CriticalPathSubtreeCalculator,
    fragment::CombinatorialFragment,
    ftree::FragmentTree,
    manipulator::remove_dangling_subtrees,
    molecule::{Atom, Bond, Element, MolecularGraph},
    pcst::{PcstFragmentationTreeAnnotator, PcstInstance, PcstSolution, PcstSolver, SolverError},
    prim::PrimSubtreeCalculator,
    scoring::{AnnotatedPeakScoring, UniformBondScoring},
    subtree::{parse_newick, CombinatorialSubtree},
};

fn chain(n: usize) -> MolecularGraph {
    let atoms = vec![Atom::new(Element::C, 2); n];
    let bonds = (0..n - 1).map(|i| (i, i + 1, Bond::Single)).collect();
    MolecularGraph::new(atoms, bonds)
}

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

fn fragment(atoms: &[usize]) -> CombinatorialFragment {
    CombinatorialFragment::new(atoms.iter().copied().collect(), BitSet::new(), false)
}

/// A binary tree of twelve nodes with mixed positive and negative
/// contributions; the expected pruning result is worked out by hand.
fn mixed_tree(mol: &MolecularGraph) -> CombinatorialSubtree<'_> {
    let fragment_scores = [1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 3.0, 1.0, 1.0, 0.0, 1.0];
    let edge_scores = [1.0, -1.0, 1.0, -1.0, -1.0, -1.0, 1.0, -1.0, -1.0, -1.0, -1.0, -1.0];
    // parent of node i, with usize::MAX for the root.
    let parents = [
        usize::MAX,
        usize::MAX,
        0,
        2,
        0,
        1,
        4,
        2,
        6,
        10,
        1,
        5,
    ];
    let mut tree = CombinatorialSubtree::new(mol);
    let mut ids = vec![0usize; 12];
    // Insert in an order where parents precede children.
    for &i in &[0, 1, 2, 4, 10, 5, 3, 7, 6, 8, 9, 11] {
        let parent = if parents[i] == usize::MAX {
            tree.root()
        } else {
            ids[parents[i]]
        };
        ids[i] = tree
            .add_fragment(
                parent,
                &fragment(&[i]),
                Some(0),
                None,
                fragment_scores[i],
                edge_scores[i],
            )
            .unwrap();
    }
    tree
}

#[test]
fn mixed_tree_prunes_to_seven_nodes_with_score_seven() {
    let mol = chain(13);
    let mut tree = mixed_tree(&mol);
    assert_eq!(tree.number_of_nodes(), 13);

    let score = remove_dangling_subtrees(&mut tree);
    assert_eq!(score, 7.0);
    assert_eq!(tree.number_of_nodes(), 7);

    // The kept branch.
    for kept in [0, 2, 4, 6, 7, 8] {
        assert!(tree.contains(&fragment(&[kept])), "node {kept} kept");
    }
    // The pruned branches.
    for gone in [1, 3, 5, 9, 10, 11] {
        assert!(!tree.contains(&fragment(&[gone])), "node {gone} gone");
    }

    // A second pass changes nothing.
    let again = remove_dangling_subtrees(&mut tree);
    assert_eq!(again, 7.0);
    assert_eq!(tree.number_of_nodes(), 7);
}

#[test]
fn newick_round_trip_of_a_pruned_tree() {
    let mol = chain(13);
    let mut tree = mixed_tree(&mol);
    remove_dangling_subtrees(&mut tree);
    let parsed = parse_newick(&tree.to_newick()).unwrap();
    assert_eq!(parsed.tree_score(), tree.get_score());
}

#[test]
fn prim_strands_targets_behind_unmatched_intermediates() {
    let mol = ethanol();
    let mut reference = FragmentTree::new("C2H6O".parse().unwrap());
    // CH2 resolves to the middle carbon; every path to it runs through
    // an unmatched two-atom fragment.
    reference.add_child(0, "CH2".parse().unwrap(), 0.0);

    let mut prim = PrimSubtreeCalculator::new(&mol, &reference, UniformBondScoring::default());
    prim.initialize(&mut |_, _, _| true).unwrap();
    let prim_score = prim.compute_subtree().unwrap();
    assert_eq!(prim_score, 0.0);
    assert_eq!(prim.subtree().unwrap().number_of_nodes(), 1);
    assert!(prim.hydrogen_rearrangements().unwrap().is_empty());

    let mut cp =
        CriticalPathSubtreeCalculator::new(&mol, &reference, UniformBondScoring::default());
    cp.initialize(&mut |_, _, _| true).unwrap();
    let cp_score = cp.compute_subtree().unwrap();
    assert_eq!(cp_score, -2.0);
    assert_eq!(cp.subtree().unwrap().number_of_nodes(), 3);
    assert_eq!(cp.hydrogen_rearrangements().unwrap(), vec![0]);
}

/// Brute-force PCST solver for tiny instances: tries every edge subset
/// and keeps the best valid rooted tree.
struct ExhaustiveSolver;

impl PcstSolver for ExhaustiveSolver {
    fn solve(&self, instance: &PcstInstance) -> Result<PcstSolution, SolverError> {
        let m = instance.edges.len();
        if m > 20 {
            return Err(SolverError::Failed("instance too large".into()));
        }
        let mut best: Option<(f64, Vec<usize>)> = None;
        for mask in 0u32..(1 << m) {
            let edges: Vec<usize> = (0..m).filter(|i| mask & (1 << i) != 0).collect();
            let mut parent_of = HashMap::new();
            if edges
                .iter()
                .any(|&e| parent_of.insert(instance.edges[e].target, e).is_some())
            {
                continue;
            }
            let mut reached = HashSet::from([instance.root]);
            let mut changed = true;
            while changed {
                changed = false;
                for &e in &edges {
                    let edge = &instance.edges[e];
                    if reached.contains(&edge.source) && !reached.contains(&edge.target) {
                        reached.insert(edge.target);
                        changed = true;
                    }
                }
            }
            if edges.iter().any(|&e| !reached.contains(&instance.edges[e].target)) {
                continue;
            }
            let value = reached.iter().map(|&v| instance.prizes[v]).sum::<f64>()
                - edges.iter().map(|&e| instance.edges[e].cost).sum::<f64>();
            if best.as_ref().map(|(b, _)| value > *b).unwrap_or(true) {
                best = Some((value, edges));
            }
        }
        Ok(PcstSolution {
            edges: best.map(|(_, edges)| edges).unwrap_or_default(),
        })
    }
}

#[test]
fn exact_pcst_reaches_deep_targets() {
    let mol = ethanol();
    let mut reference = FragmentTree::new("C2H6O".parse().unwrap());
    reference.add_child(0, "CH2".parse().unwrap(), 1.0);

    let scoring = AnnotatedPeakScoring::new(&mol, &reference);
    let mut annotator =
        PcstFragmentationTreeAnnotator::new(&mol, &reference, scoring, ExhaustiveSolver);
    annotator.initialize(&mut |_, _, _| true).unwrap();
    let score = annotator.compute_subtree().unwrap();

    // The peak prize outweighs the two bond cuts on the path.
    assert!(score > 0.0);
    assert_eq!(annotator.subtree().unwrap().number_of_nodes(), 3);
    assert_eq!(annotator.hydrogen_rearrangements().unwrap(), vec![0]);
    assert_eq!(annotator.score().unwrap(), score);
}

#[test]
fn pcst_with_no_worthwhile_prizes_stays_at_the_root() {
    let mol = ethanol();
    let reference = FragmentTree::new("C2H6O".parse().unwrap());
    let mut annotator = PcstFragmentationTreeAnnotator::new(
        &mol,
        &reference,
        UniformBondScoring::default(),
        ExhaustiveSolver,
    );
    annotator.initialize(&mut |_, _, _| true).unwrap();
    let score = annotator.compute_subtree().unwrap();
    assert_eq!(score, 0.0);
    assert_eq!(annotator.subtree().unwrap().number_of_nodes(), 1);
}

#[test]
fn annotated_scoring_prefers_the_matching_skeleton() {
    let mol = ethanol();
    let mut reference = FragmentTree::new("C2H6O".parse().unwrap());
    reference.add_child(0, "CH3O".parse().unwrap(), 0.5);

    let scoring = AnnotatedPeakScoring::new(&mol, &reference);
    let mut cp = CriticalPathSubtreeCalculator::new(&mol, &reference, scoring);
    cp.initialize(&mut |_, _, _| true).unwrap();
    let score = cp.compute_subtree().unwrap();
    // One C-C cut buys the peak prize plus its intensity bonus.
    assert!(score > AnnotatedPeakScoring::PEAK_SCORE - 1.0);
    let subtree = cp.into_subtree().unwrap();
    assert_eq!(subtree.number_of_nodes(), 2);
    assert!(subtree.contains(&fragment(&[1, 2])));
}
