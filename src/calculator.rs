//! The subtree calculator contract and shared matching state.
//!
//! A calculator is driven through a strict three-phase life cycle:
//! build the fragmentation graph (`initialize`), extract a subtree
//! (`compute_subtree`), then read the result. Phase violations are
//! reported as [`CalculatorError`] values, never panics.

use thiserror::Error;

use crate::{
    formula::MolecularFormula,
    fragmenter::{CombinatorialFragmenter, NodePredicate},
    ftree::FragmentTree,
    graph::CombinatorialGraph,
    molecule::MolecularGraph,
    pcst::SolverError,
    scoring::FragmentationScoring,
    subtree::CombinatorialSubtree,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CalculatorState {
    Uninitialized,
    Initialized,
    Computed,
}

#[derive(Debug, Error)]
pub enum CalculatorError {
    #[error("calculator has not been initialized")]
    NotInitialized,
    #[error("calculator is already initialized")]
    AlreadyInitialized,
    #[error("no subtree has been computed yet")]
    NotComputed,
    #[error(transparent)]
    Solver(#[from] SolverError),
}

/// Extracts a scored subtree out of a fragmentation graph, guided by a
/// reference tree of observed formulas.
pub trait SubtreeCalculator {
    fn state(&self) -> CalculatorState;

    /// Build the fragmentation graph; `predicate` gates node expansion
    /// as in the fragmenter.
    fn initialize(&mut self, predicate: &mut NodePredicate) -> Result<(), CalculatorError>;

    /// Run the extraction and return the subtree score.
    fn compute_subtree(&mut self) -> Result<f64, CalculatorError>;

    fn subtree(&self) -> Result<&CombinatorialSubtree, CalculatorError>;

    fn score(&self) -> Result<f64, CalculatorError>;

    /// Absolute hydrogen differences of the explained reference
    /// formulas, in reference order.
    fn hydrogen_rearrangements(&self) -> Result<Vec<u32>, CalculatorError>;
}

/// One reference formula to explain, with its resolved graph node.
pub(crate) struct TargetFormula {
    pub(crate) formula: MolecularFormula,
    skeleton: MolecularFormula,
    /// Best-matching terminal graph node, resolved at initialization.
    pub(crate) matched: Option<usize>,
    /// Set by the calculators once the node is part of the subtree.
    pub(crate) assigned: bool,
}

/// State shared by every calculator implementation: the fragmenter, the
/// life-cycle phase, the graph and subtree under construction, and the
/// reference formulas with their matches.
pub(crate) struct MatchingContext<'a, S: FragmentationScoring> {
    pub(crate) fragmenter: CombinatorialFragmenter<'a, S>,
    pub(crate) state: CalculatorState,
    pub(crate) graph: Option<CombinatorialGraph<'a>>,
    pub(crate) subtree: Option<CombinatorialSubtree<'a>>,
    pub(crate) targets: Vec<TargetFormula>,
}

impl<'a, S: FragmentationScoring> MatchingContext<'a, S> {
    pub(crate) fn new(mol: &'a MolecularGraph, tree: &FragmentTree, scoring: S) -> Self {
        let targets = tree
            .formulas_without_root()
            .map(|formula| TargetFormula {
                skeleton: formula.without_hydrogen(),
                formula: formula.clone(),
                matched: None,
                assigned: false,
            })
            .collect();
        Self {
            fragmenter: CombinatorialFragmenter::new(mol, scoring),
            state: CalculatorState::Uninitialized,
            graph: None,
            subtree: None,
            targets,
        }
    }

    pub(crate) fn molecule(&self) -> &'a MolecularGraph {
        self.fragmenter.molecule()
    }

    /// Build the graph and resolve each reference formula to its best
    /// matching terminal node: same heavy-atom skeleton, smallest
    /// `|dh|`, then higher total score, then lowest node id.
    pub(crate) fn initialize(&mut self, predicate: &mut NodePredicate) -> Result<(), CalculatorError> {
        if self.state != CalculatorState::Uninitialized {
            return Err(CalculatorError::AlreadyInitialized);
        }
        let graph = self
            .fragmenter
            .create_combinatorial_fragmentation_graph(predicate);
        let mol = self.molecule();
        for target in &mut self.targets {
            let mut best: Option<(i64, f64, usize)> = None;
            for (id, node) in graph.nodes().iter().enumerate().skip(1) {
                let fragment = node.fragment();
                if fragment.is_inner_node() {
                    continue;
                }
                let formula = fragment.formula(mol);
                if formula.without_hydrogen() != target.skeleton {
                    continue;
                }
                let dh = formula.hydrogen_difference(&target.formula).abs();
                let candidate = (dh, node.total_score(), id);
                let better = match &best {
                    None => true,
                    Some((bdh, btotal, bid)) => {
                        dh < *bdh
                            || (dh == *bdh
                                && (candidate.1 > *btotal || (candidate.1 == *btotal && id < *bid)))
                    }
                };
                if better {
                    best = Some(candidate);
                }
            }
            target.matched = best.map(|(_, _, id)| id);
        }
        self.graph = Some(graph);
        self.subtree = Some(CombinatorialSubtree::new(self.fragmenter.molecule()));
        self.state = CalculatorState::Initialized;
        Ok(())
    }

    pub(crate) fn graph(&self) -> Result<&CombinatorialGraph<'a>, CalculatorError> {
        self.graph.as_ref().ok_or(CalculatorError::NotInitialized)
    }

    pub(crate) fn computed_subtree(&self) -> Result<&CombinatorialSubtree<'a>, CalculatorError> {
        if self.state != CalculatorState::Computed {
            return Err(CalculatorError::NotComputed);
        }
        self.subtree.as_ref().ok_or(CalculatorError::NotComputed)
    }

    pub(crate) fn computed_score(&self) -> Result<f64, CalculatorError> {
        self.computed_subtree().map(|t| t.get_score())
    }

    /// `|dh|` of every assigned reference formula, in reference order.
    pub(crate) fn rearrangements(&self) -> Result<Vec<u32>, CalculatorError> {
        if self.state != CalculatorState::Computed {
            return Err(CalculatorError::NotComputed);
        }
        let graph = self.graph()?;
        let mol = self.molecule();
        Ok(self
            .targets
            .iter()
            .filter(|t| t.assigned)
            .filter_map(|t| t.matched.map(|id| (id, &t.formula)))
            .map(|(id, formula)| {
                graph
                    .node(id)
                    .fragment()
                    .formula(mol)
                    .hydrogen_difference(formula)
                    .unsigned_abs() as u32
            })
            .collect())
    }

    /// Mark every target whose matched node is already in the subtree
    /// as assigned.
    pub(crate) fn assign_present_targets(&mut self) {
        let (Some(graph), Some(subtree)) = (&self.graph, &self.subtree) else {
            return;
        };
        for target in &mut self.targets {
            if let Some(id) = target.matched {
                if !target.assigned && subtree.contains(graph.node(id).fragment()) {
                    target.assigned = true;
                }
            }
        }
    }
}
