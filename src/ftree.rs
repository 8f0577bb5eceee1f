//! Reference fragmentation trees, the observed side of annotation.
//!
//! A [`FragmentTree`] is a consumed input: formulas (with optional
//! intensities) arranged as a tree, typically derived from an annotated
//! spectrum. The calculators only read it.

use crate::formula::MolecularFormula;

/// One observed fragment: a formula with a peak intensity.
#[derive(Debug, Clone)]
pub struct TreeFragment {
    formula: MolecularFormula,
    intensity: f64,
    parent: Option<usize>,
    children: Vec<usize>,
}

impl TreeFragment {
    pub fn formula(&self) -> &MolecularFormula {
        &self.formula
    }

    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }
}

/// A rooted tree of observed fragment formulas.
#[derive(Debug, Clone)]
pub struct FragmentTree {
    nodes: Vec<TreeFragment>,
}

impl FragmentTree {
    /// A tree holding only the precursor formula (index 0).
    pub fn new(root_formula: MolecularFormula) -> Self {
        Self {
            nodes: vec![TreeFragment {
                formula: root_formula,
                intensity: 0.0,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Attach a fragment under `parent` and return its index.
    pub fn add_child(&mut self, parent: usize, formula: MolecularFormula, intensity: f64) -> usize {
        let id = self.nodes.len();
        self.nodes.push(TreeFragment {
            formula,
            intensity,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn root(&self) -> &TreeFragment {
        &self.nodes[0]
    }

    pub fn fragments(&self) -> &[TreeFragment] {
        &self.nodes
    }

    /// Formulas of every fragment below the root, in insertion order.
    pub fn formulas_without_root(&self) -> impl Iterator<Item = &MolecularFormula> {
        self.nodes.iter().skip(1).map(|n| &n.formula)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_attach_under_their_parent() {
        let mut tree = FragmentTree::new("C6H6O2".parse().unwrap());
        let a = tree.add_child(0, "C5H4O".parse().unwrap(), 0.8);
        let b = tree.add_child(a, "C3H2".parse().unwrap(), 0.2);
        assert_eq!(tree.root().children(), &[a]);
        assert_eq!(tree.fragments()[a].children(), &[b]);
        assert_eq!(tree.fragments()[b].parent(), Some(a));
        assert_eq!(tree.formulas_without_root().count(), 2);
    }
}
