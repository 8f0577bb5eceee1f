//! Subtree extraction by repeated critical-path insertion.
//!
//! Each round scores, for every graph node, the best path attaching it
//! to the current subtree (anchored at any tree node), picks the most
//! valuable matched node of an open reference formula, and inserts its
//! whole path. Unlike the greedy Prim variant this reaches matched
//! nodes hidden behind unmatched intermediates.

use crate::{
    calculator::{CalculatorError, CalculatorState, MatchingContext, SubtreeCalculator},
    fragmenter::NodePredicate,
    ftree::FragmentTree,
    graph::CombinatorialGraph,
    molecule::MolecularGraph,
    scoring::FragmentationScoring,
    subtree::CombinatorialSubtree,
};

pub struct CriticalPathSubtreeCalculator<'a, S: FragmentationScoring> {
    context: MatchingContext<'a, S>,
}

impl<'a, S: FragmentationScoring> CriticalPathSubtreeCalculator<'a, S> {
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

/// Topological order of the graph: descending atom count, then
/// ascending number of opened rings, then node id. Every edge goes to a
/// strictly smaller atom set or opens additional rings, so sources
/// always precede targets.
fn topological_order(graph: &CombinatorialGraph) -> Vec<usize> {
    let mut order: Vec<usize> = (0..graph.number_of_nodes()).collect();
    order.sort_by(|&a, &b| {
        let (fa, fb) = (graph.node(a).fragment(), graph.node(b).fragment());
        fb.natoms()
            .cmp(&fa.natoms())
            .then(fa.disconnected_rings().len().cmp(&fb.disconnected_rings().len()))
            .then(a.cmp(&b))
    });
    order
}

impl<S: FragmentationScoring> SubtreeCalculator for CriticalPathSubtreeCalculator<'_, S> {
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
        let order = topological_order(graph);

        loop {
            for target in targets.iter_mut() {
                if let Some(m) = target.matched {
                    if !target.assigned && subtree.contains(graph.node(m).fragment()) {
                        target.assigned = true;
                    }
                }
            }
            if !targets.iter().any(|t| !t.assigned && t.matched.is_some()) {
                break;
            }

            // Best attachment value per node: zero inside the tree,
            // otherwise the best predecessor value plus edge and
            // fragment score, with the chosen incoming edge recorded.
            let n = graph.number_of_nodes();
            let mut value = vec![f64::NEG_INFINITY; n];
            let mut pred: Vec<Option<usize>> = vec![None; n];
            for &v in &order {
                if subtree.contains(graph.node(v).fragment()) {
                    value[v] = 0.0;
                    continue;
                }
                for &e in graph.node(v).incoming() {
                    let edge = graph.edge(e);
                    let candidate =
                        value[edge.source()] + edge.score() + graph.node(v).fragment_score();
                    if candidate > value[v] {
                        value[v] = candidate;
                        pred[v] = Some(e);
                    }
                }
            }

            // Most valuable open target; ties by |dh|, total score,
            // node id.
            let mut best: Option<(f64, i64, f64, usize)> = None;
            for target in targets.iter().filter(|t| !t.assigned) {
                let Some(m) = target.matched else { continue };
                let node = graph.node(m);
                let dh = node
                    .fragment()
                    .formula(mol)
                    .hydrogen_difference(&target.formula)
                    .abs();
                let key = (value[m], dh, node.total_score(), m);
                let better = match &best {
                    None => true,
                    Some((bvalue, bdh, btotal, bm)) => {
                        key.0 > *bvalue
                            || (key.0 == *bvalue
                                && (dh < *bdh
                                    || (dh == *bdh
                                        && (key.2 > *btotal || (key.2 == *btotal && m < *bm)))))
                    }
                };
                if better {
                    best = Some(key);
                }
            }
            let Some((_, _, _, m)) = best else { break };

            // Insert the whole path, anchor first.
            let mut path = Vec::new();
            let mut cursor = m;
            while let Some(e) = pred[cursor] {
                path.push(e);
                cursor = graph.edge(e).source();
            }
            for &e in path.iter().rev() {
                let edge = graph.edge(e);
                let node = graph.node(edge.target());
                let parent = match subtree.get_node(graph.node(edge.source()).fragment()) {
                    Some(p) => p,
                    None => continue,
                };
                subtree.add_fragment(
                    parent,
                    node.fragment(),
                    Some(edge.cut1()),
                    edge.cut2(),
                    node.fragment_score(),
                    edge.score(),
                );
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        molecule::{Atom, Bond, Element},
        scoring::UniformBondScoring,
    };

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
    fn inserts_paths_through_unmatched_intermediates() {
        let mol = ethanol();
        let mut tree = FragmentTree::new("C2H6O".parse().unwrap());
        // CH2 resolves to the middle carbon, which has no direct edge
        // from the root.
        tree.add_child(0, "CH2".parse().unwrap(), 0.0);
        let mut calc =
            CriticalPathSubtreeCalculator::new(&mol, &tree, UniformBondScoring::default());
        calc.initialize(&mut |_, _, _| true).unwrap();
        let score = calc.compute_subtree().unwrap();
        assert_eq!(score, -2.0);
        // Root, one intermediate, the matched carbon.
        assert_eq!(calc.subtree().unwrap().number_of_nodes(), 3);
        assert_eq!(calc.hydrogen_rearrangements().unwrap(), vec![0]);
    }

    #[test]
    fn already_present_targets_cost_nothing_extra() {
        let mol = ethanol();
        let mut tree = FragmentTree::new("C2H6O".parse().unwrap());
        tree.add_child(0, "CH3O".parse().unwrap(), 0.0);
        tree.add_child(0, "CH4O".parse().unwrap(), 0.0);
        let mut calc =
            CriticalPathSubtreeCalculator::new(&mol, &tree, UniformBondScoring::default());
        calc.initialize(&mut |_, _, _| true).unwrap();
        // Both formulas resolve to the same {C, O} fragment.
        let score = calc.compute_subtree().unwrap();
        assert_eq!(score, -1.0);
        assert_eq!(calc.subtree().unwrap().number_of_nodes(), 2);
        assert_eq!(calc.hydrogen_rearrangements().unwrap(), vec![0, 1]);
    }
}
