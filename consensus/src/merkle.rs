//! Merkle tree over election challenges
//!
//! Each roster member contributes one leaf (its challenge nonce). A puzzle solution
//! carries the inclusion proof of the solver's tree for the receiver's own leaf, which
//! ties the solution to the receiver's challenge.

use rvr_core::{NodeId, RvrError, RvrResult};
use rvr_crypto::hashing::merkle_node_hash;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct TreeNode {
    hash: Vec<u8>,
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
}

/// Arena-backed puzzle tree; the first `leaves.len()` arena slots are the leaves
#[derive(Debug, Clone, Default)]
pub struct PuzzleMerkleTree {
    leaves: Vec<Vec<u8>>,
    index: HashMap<NodeId, usize>,
    nodes: Vec<TreeNode>,
    root: Option<usize>,
}

impl PuzzleMerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the leaf of `id`. Invalidates any built tree.
    pub fn add_nonce(&mut self, id: NodeId, nonce: Vec<u8>) -> RvrResult<()> {
        if self.index.contains_key(&id) {
            return Err(RvrError::DuplicateId(id));
        }
        self.index.insert(id, self.leaves.len());
        self.leaves.push(nonce);
        self.nodes.clear();
        self.root = None;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    /// Build the tree from the leaves in insertion order. No-op if already built.
    pub fn form_tree(&mut self) {
        if self.root.is_some() || self.leaves.is_empty() {
            return;
        }

        self.nodes = self
            .leaves
            .iter()
            .map(|leaf| TreeNode {
                hash: leaf.clone(),
                parent: None,
                left: None,
                right: None,
            })
            .collect();

        let mut level: Vec<usize> = (0..self.nodes.len()).collect();
        while level.len() > 1 {
            let mut next = Vec::with_capacity((level.len() + 1) / 2);
            for pair in level.chunks(2) {
                let left = pair[0];
                let right = pair.get(1).copied();
                let hash = {
                    let right_hash: &[u8] = right.map(|r| self.nodes[r].hash.as_slice()).unwrap_or(&[]);
                    merkle_node_hash(&self.nodes[left].hash, right_hash)
                };
                let parent = self.nodes.len();
                self.nodes.push(TreeNode {
                    hash,
                    parent: None,
                    left: Some(left),
                    right,
                });
                self.nodes[left].parent = Some(parent);
                if let Some(r) = right {
                    self.nodes[r].parent = Some(parent);
                }
                next.push(parent);
            }
            level = next;
        }
        self.root = level.first().copied();
    }

    /// Root hash, building the tree if needed. `None` for an empty tree.
    pub fn root_hash(&mut self) -> Option<Vec<u8>> {
        self.form_tree();
        self.root.map(|root| self.nodes[root].hash.clone())
    }

    /// Inclusion proof of `id`: its leaf, then one sibling per level (empty when the
    /// node had none). `order[i]` is true when the running hash is the left operand.
    pub fn get_proof(&mut self, id: NodeId) -> RvrResult<(Vec<Vec<u8>>, Vec<bool>)> {
        let leaf = *self.index.get(&id).ok_or(RvrError::NotFound(id))?;
        self.form_tree();

        let mut proof = vec![self.nodes[leaf].hash.clone()];
        let mut order = Vec::new();
        let mut current = leaf;
        while let Some(parent) = self.nodes[current].parent {
            let node = &self.nodes[parent];
            if node.left == Some(current) {
                let sibling = node
                    .right
                    .map(|r| self.nodes[r].hash.clone())
                    .unwrap_or_default();
                proof.push(sibling);
                order.push(true);
            } else {
                let sibling = node
                    .left
                    .map(|l| self.nodes[l].hash.clone())
                    .unwrap_or_default();
                proof.push(sibling);
                order.push(false);
            }
            current = parent;
        }
        Ok((proof, order))
    }
}

/// Fold a proof into the root it commits to
pub fn eval_proof(proof: &[Vec<u8>], order: &[bool]) -> Option<Vec<u8>> {
    let (leaf, siblings) = proof.split_first()?;
    if siblings.len() != order.len() {
        return None;
    }
    let root = siblings
        .iter()
        .zip(order)
        .fold(leaf.clone(), |acc, (sibling, &is_left)| {
            if is_left {
                merkle_node_hash(&acc, sibling)
            } else {
                merkle_node_hash(sibling, &acc)
            }
        });
    Some(root)
}
