//! Subtree pruning: drop branches that cost more than they explain.

use crate::subtree::CombinatorialSubtree;

/// Remove every dangling subtree, i.e. every branch whose best
/// achievable contribution is negative.
///
/// The best achievable value of a node is its fragment plus edge score
/// plus the sum of its children's values where positive; a child with a
/// negative value is detached whole. Zero-valued branches stay. The
/// root is never removed. Returns the score of the pruned tree; a
/// second invocation is a no-op.
pub fn remove_dangling_subtrees(subtree: &mut CombinatorialSubtree) -> f64 {
    let best = best_achievable(subtree);
    let mut stack = vec![subtree.root()];
    while let Some(id) = stack.pop() {
        let children: Vec<usize> = subtree.node(id).children().to_vec();
        for child in children {
            if best[child] < 0.0 {
                subtree.remove_subtree_at(child);
            } else {
                stack.push(child);
            }
        }
    }
    subtree.get_score()
}

/// Post-order DP over the live tree, indexed by node id.
fn best_achievable(subtree: &CombinatorialSubtree) -> Vec<f64> {
    let size = subtree.node_ids().max().map(|m| m + 1).unwrap_or(1);
    let mut best = vec![0.0f64; size];
    // Two-phase stack DFS: first visit pushes children, second visit
    // folds them.
    let mut stack = vec![(subtree.root(), false)];
    while let Some((id, expanded)) = stack.pop() {
        if !expanded {
            stack.push((id, true));
            for &child in subtree.node(id).children() {
                stack.push((child, false));
            }
        } else {
            let node = subtree.node(id);
            let own = node.fragment_score() + node.edge().map(|e| e.score()).unwrap_or(0.0);
            let children_gain: f64 = node
                .children()
                .iter()
                .map(|&c| best[c].max(0.0))
                .sum();
            best[id] = own + children_gain;
        }
    }
    best
}
