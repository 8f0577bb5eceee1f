//! Greedy subtree extraction in the style of Prim's algorithm.
//!
//! Grows the subtree one edge at a time, always taking the best graph
//! edge from the current tree to the matched node of a still
//! unexplained reference formula. Matched nodes only reachable through
//! unmatched intermediates are never reached; that is the documented
//! trade-off against the critical-path calculator.

use std::collections::HashMap;

use crate::{
    calculator::{CalculatorError, CalculatorState, MatchingContext, SubtreeCalculator},
    fragmenter::NodePredicate,
    ftree::FragmentTree,
    molecule::MolecularGraph,
    scoring::FragmentationScoring,
    subtree::CombinatorialSubtree,
};

pub struct PrimSubtreeCalculator<'a, S: FragmentationScoring> {
    context: MatchingContext<'a, S>,
}

impl<'a, S: FragmentationScoring> PrimSubtreeCalculator<'a, S> {
    pub fn new(mol: &'a MolecularGraph, tree: &FragmentTree, scoring: S) -> Self {
        Self {
            context: MatchingContext::new(mol, tree, scoring),
        }
    }

    /// Consume the calculator and hand out the computed subtree for
    /// further manipulation.
    pub fn into_subtree(self) -> Result<CombinatorialSubtree<'a>, CalculatorError> {
        if self.context.state != CalculatorState::Computed {
            return Err(CalculatorError::NotComputed);
        }
        self.context.subtree.ok_or(CalculatorError::NotComputed)
    }
}

impl<S: FragmentationScoring> SubtreeCalculator for PrimSubtreeCalculator<'_, S> {
    fn state(&self) -> CalculatorState {
        self.context.state
    }

    fn initialize(&mut self, predicate: &mut NodePredicate) -> Result<(), CalculatorError> {
        self.context.initialize(predicate)
    }

    fn compute_subtree(&mut self) -> Result<f64, CalculatorError> {
        match self.context.state {
            CalculatorState::Uninitialized => return Err(CalculatorError::NotInitialized),
            CalculatorState::Computed => return self.context.computed_score(),
            CalculatorState::Initialized => {}
        }
        let MatchingContext {
            fragmenter,
            graph,
            subtree,
            targets,
            ..
        } = &mut self.context;
        let graph = graph.as_ref().ok_or(CalculatorError::NotInitialized)?;
        let subtree = subtree.as_mut().ok_or(CalculatorError::NotInitialized)?;
        let mol = fragmenter.molecule();
        // Graph node id -> subtree node id for everything added so far.
        let mut node_map: HashMap<usize, usize> = HashMap::from([(0, 0)]);

        loop {
            // Best edge from the tree to the matched node of an open
            // target: highest edge score, then smallest |dh|, then
            // higher total score of the target node, then lowest edge
            // id.
            let mut best: Option<(f64, i64, f64, usize, usize)> = None;
            for target in targets.iter().filter(|t| !t.assigned) {
                let Some(m) = target.matched else { continue };
                if node_map.contains_key(&m) {
                    continue;
                }
                let node = graph.node(m);
                let dh = node
                    .fragment()
                    .formula(mol)
                    .hydrogen_difference(&target.formula)
                    .abs();
                for &e in node.incoming() {
                    let edge = graph.edge(e);
                    if !node_map.contains_key(&edge.source()) {
                        continue;
                    }
                    let key = (edge.score(), dh, node.total_score(), e, m);
                    let better = match &best {
                        None => true,
                        Some((bscore, bdh, btotal, be, _)) => {
                            key.0 > *bscore
                                || (key.0 == *bscore
                                    && (dh < *bdh
                                        || (dh == *bdh
                                            && (key.2 > *btotal
                                                || (key.2 == *btotal && e < *be)))))
                        }
                    };
                    if better {
                        best = Some(key);
                    }
                }
            }
            let Some((_, _, _, e, m)) = best else { break };
            let edge = graph.edge(e);
            let node = graph.node(m);
            let parent = node_map[&edge.source()];
            if let Some(id) = subtree.add_fragment(
                parent,
                node.fragment(),
                Some(edge.cut1()),
                edge.cut2(),
                node.fragment_score(),
                edge.score(),
            ) {
                node_map.insert(m, id);
            }
            for target in targets.iter_mut() {
                if target.matched == Some(m) {
                    target.assigned = true;
                }
            }
        }

        self.context.state = CalculatorState::Computed;
        self.context.computed_score()
    }

    fn subtree(&self) -> Result<&CombinatorialSubtree, CalculatorError> {
        self.context.computed_subtree()
    }

    fn score(&self) -> Result<f64, CalculatorError> {
        self.context.computed_score()
    }

    fn hydrogen_rearrangements(&self) -> Result<Vec<u32>, CalculatorError> {
        self.context.rearrangements()
    }
}
