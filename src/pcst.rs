//! Exact subtree extraction via prize-collecting Steiner trees.
//!
//! The annotator reduces the fragmentation graph to a PCST instance
//! (prizes on matched terminal nodes, costs on edges) and hands it to a
//! black-box [`PcstSolver`]. Solver output is validated strictly; a
//! malformed solution is an error, never silently repaired.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use crate::{
    calculator::{CalculatorError, CalculatorState, MatchingContext, SubtreeCalculator},
    fragmenter::NodePredicate,
    ftree::FragmentTree,
    molecule::MolecularGraph,
    scoring::FragmentationScoring,
    subtree::CombinatorialSubtree,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error("no PCST solver is available")]
    Unavailable,
    #[error("PCST solver failed: {0}")]
    Failed(String),
    #[error("PCST solver returned a malformed solution: {0}")]
    MalformedSolution(String),
}

/// A directed edge of a PCST instance; `cost` is non-negative for
/// fragmentation graphs since edge scores are penalties.
#[derive(Debug, Clone, PartialEq)]
pub struct PcstEdge {
    pub source: usize,
    pub target: usize,
    pub cost: f64,
}

/// A rooted prize-collecting Steiner tree instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PcstInstance {
    pub prizes: Vec<f64>,
    pub edges: Vec<PcstEdge>,
    pub root: usize,
}

/// Indices into [`PcstInstance::edges`] forming the chosen tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcstSolution {
    pub edges: Vec<usize>,
}

/// Black-box solver interface. Implementations may shell out to an
/// external optimizer or solve exactly.
pub trait PcstSolver {
    fn solve(&self, instance: &PcstInstance) -> Result<PcstSolution, SolverError>;
}

/// Annotates a fragmentation tree by solving the graph's PCST instance
/// exactly with the supplied solver.
pub struct PcstFragmentationTreeAnnotator<'a, S: FragmentationScoring, L: PcstSolver> {
    context: MatchingContext<'a, S>,
    solver: L,
}

impl<'a, S: FragmentationScoring, L: PcstSolver> PcstFragmentationTreeAnnotator<'a, S, L> {
    pub fn new(mol: &'a MolecularGraph, tree: &FragmentTree, scoring: S, solver: L) -> Self {
        Self {
            context: MatchingContext::new(mol, tree, scoring),
            solver,
        }
    }

    /// Consume the annotator and hand out the computed subtree for
    /// further manipulation.
    pub fn into_subtree(self) -> Result<CombinatorialSubtree<'a>, CalculatorError> {
        if self.context.state != CalculatorState::Computed {
            return Err(CalculatorError::NotComputed);
        }
        self.context.subtree.ok_or(CalculatorError::NotComputed)
    }

    /// The instance handed to the solver: one prize per graph node
    /// (the fragment score of matched terminals, zero elsewhere), one
    /// cost per edge (the negated edge score).
    pub fn instance(&self) -> Result<PcstInstance, CalculatorError> {
        let graph = self.context.graph()?;
        let mut prizes = vec![0.0; graph.number_of_nodes()];
        for target in &self.context.targets {
            if let Some(m) = target.matched {
                prizes[m] = graph.node(m).fragment_score();
            }
        }
        let edges = graph
            .edges()
            .iter()
            .map(|e| PcstEdge {
                source: e.source(),
                target: e.target(),
                cost: -e.score(),
            })
            .collect();
        Ok(PcstInstance {
            prizes,
            edges,
            root: 0,
        })
    }
}

impl<S: FragmentationScoring, L: PcstSolver> SubtreeCalculator
    for PcstFragmentationTreeAnnotator<'_, S, L>
{
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
        let instance = self.instance()?;
        let solution = self.solver.solve(&instance)?;

        let MatchingContext {
            graph, subtree, ..
        } = &mut self.context;
        let graph = graph.as_ref().ok_or(CalculatorError::NotInitialized)?;
        let subtree = subtree.as_mut().ok_or(CalculatorError::NotInitialized)?;

        for &e in &solution.edges {
            if e >= graph.edge_count() {
                return Err(SolverError::MalformedSolution(format!(
                    "edge index {e} out of range"
                ))
                .into());
            }
        }
        let mut by_source: HashMap<usize, Vec<usize>> = HashMap::new();
        for &e in &solution.edges {
            by_source.entry(graph.edge(e).source()).or_default().push(e);
        }

        // Grow from the root; every selected edge must be used exactly
        // once and every node entered at most once.
        let mut node_map: HashMap<usize, usize> = HashMap::from([(0, 0)]);
        let mut used = 0usize;
        let mut queue = VecDeque::from([0usize]);
        while let Some(v) = queue.pop_front() {
            let Some(out) = by_source.get(&v) else { continue };
            for &e in out {
                let edge = graph.edge(e);
                let node = graph.node(edge.target());
                if node_map.contains_key(&edge.target()) {
                    return Err(SolverError::MalformedSolution(format!(
                        "node {} has multiple parents",
                        edge.target()
                    ))
                    .into());
                }
                let parent = node_map[&v];
                match subtree.add_fragment(
                    parent,
                    node.fragment(),
                    Some(edge.cut1()),
                    edge.cut2(),
                    node.fragment_score(),
                    edge.score(),
                ) {
                    Some(id) => {
                        node_map.insert(edge.target(), id);
                    }
                    None => {
                        return Err(SolverError::MalformedSolution(format!(
                            "duplicate fragment at node {}",
                            edge.target()
                        ))
                        .into())
                    }
                }
                used += 1;
                queue.push_back(edge.target());
            }
        }
        if used != solution.edges.len() {
            return Err(
                SolverError::MalformedSolution("solution is not connected to the root".into())
                    .into(),
            );
        }

        self.context.assign_present_targets();
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

    struct FailingSolver;

    impl PcstSolver for FailingSolver {
        fn solve(&self, _instance: &PcstInstance) -> Result<PcstSolution, SolverError> {
            Err(SolverError::Failed("no license".into()))
        }
    }

    struct FixedSolver(Vec<usize>);

    impl PcstSolver for FixedSolver {
        fn solve(&self, _instance: &PcstInstance) -> Result<PcstSolution, SolverError> {
            Ok(PcstSolution {
                edges: self.0.clone(),
            })
        }
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

    #[test]
    fn solver_failure_propagates() {
        let mol = ethanol();
        let tree = FragmentTree::new("C2H6O".parse().unwrap());
        let mut calc = PcstFragmentationTreeAnnotator::new(
            &mol,
            &tree,
            UniformBondScoring::default(),
            FailingSolver,
        );
        calc.initialize(&mut |_, _, _| true).unwrap();
        assert!(matches!(
            calc.compute_subtree(),
            Err(CalculatorError::Solver(SolverError::Failed(_)))
        ));
    }

    #[test]
    fn disconnected_solutions_are_rejected() {
        let mol = ethanol();
        let tree = FragmentTree::new("C2H6O".parse().unwrap());
        // Pick an edge between two non-root nodes without connecting
        // it to the root.
        let mut calc = PcstFragmentationTreeAnnotator::new(
            &mol,
            &tree,
            UniformBondScoring::default(),
            FixedSolver(vec![4]),
        );
        calc.initialize(&mut |_, _, _| true).unwrap();
        assert!(matches!(
            calc.compute_subtree(),
            Err(CalculatorError::Solver(SolverError::MalformedSolution(_)))
        ));
    }

    #[test]
    fn instance_reflects_prizes_and_costs() {
        let mol = ethanol();
        let mut tree = FragmentTree::new("C2H6O".parse().unwrap());
        tree.add_child(0, "CH3O".parse().unwrap(), 0.0);
        let mut calc = PcstFragmentationTreeAnnotator::new(
            &mol,
            &tree,
            UniformBondScoring::default(),
            FailingSolver,
        );
        calc.initialize(&mut |_, _, _| true).unwrap();
        let instance = calc.instance().unwrap();
        assert_eq!(instance.root, 0);
        assert_eq!(instance.prizes.len(), 6);
        assert!(instance.edges.iter().all(|e| e.cost == 1.0));
    }
}
