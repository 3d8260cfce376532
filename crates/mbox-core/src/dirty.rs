//! Per-field change tracking over a record's field tree.
//!
//! Every node of the tree (leaves, interior structures and the synthetic
//! root `""`) carries two generation numbers:
//!
//! - `written`: the tracker generation of the last write at or below the node
//! - `acked`: the newest generation the reader has acknowledged for the node
//!
//! A node is marked while `written > acked`. Writes bump a tracker-wide
//! generation, so a reader that acknowledges "everything up to the generation
//! I fetched" can never erase a mark set by a write that landed after its
//! fetch. Plain [`DirtyTracker::clear`] acknowledges everything written so far.
//!
//! ```text
//! ""                      root: marked if anything below was written
//! ├── steerers
//! │   ├── steerers.x
//! │   └── steerers.y
//! └── nextApplyAfter
//!     ├── nextApplyAfter.secondsPastEpoch
//!     └── nextApplyAfter.nanoseconds
//! ```

use std::collections::HashMap;

/// Path of the synthetic root node.
pub const ROOT: &str = "";

#[derive(Debug, Clone)]
struct Node {
    path: String,
    parent: Option<usize>,
    children: Vec<usize>,
    written: u64,
    acked: u64,
}

impl Node {
    fn new(path: String, parent: Option<usize>) -> Self {
        Self {
            path,
            parent,
            children: Vec::new(),
            written: 0,
            acked: 0,
        }
    }

    #[inline]
    fn is_marked(&self) -> bool {
        self.written > self.acked
    }
}

/// Change-flag overlay mirroring a record's field tree.
#[derive(Debug, Clone)]
pub struct DirtyTracker {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    generation: u64,
}

impl DirtyTracker {
    /// Build the tree from a record's leaf paths.
    ///
    /// Interior nodes are derived from the dotted prefixes of the leaves.
    #[must_use]
    pub fn for_fields(leaves: &[&str]) -> Self {
        let mut tracker = Self {
            nodes: vec![Node::new(ROOT.to_owned(), None)],
            index: HashMap::from([(ROOT.to_owned(), 0)]),
            generation: 0,
        };
        for leaf in leaves {
            let mut parent = 0;
            let mut end = 0;
            for segment in leaf.split('.') {
                end += segment.len();
                let prefix = &leaf[..end];
                parent = match tracker.index.get(prefix) {
                    Some(&idx) => idx,
                    None => tracker.insert(prefix, parent),
                };
                end += 1; // skip the dot
            }
        }
        tracker
    }

    fn insert(&mut self, path: &str, parent: usize) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node::new(path.to_owned(), Some(parent)));
        self.nodes[parent].children.push(idx);
        self.index.insert(path.to_owned(), idx);
        idx
    }

    /// Current write generation. Increases by one per [`mark_written`](Self::mark_written).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Is `path` part of the tree?
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Mark `path` and all of its ancestors up to the root as written.
    ///
    /// Returns `false` (and changes nothing) for an unknown path.
    pub fn mark_written(&mut self, path: &str) -> bool {
        let Some(&idx) = self.index.get(path) else {
            return false;
        };
        self.generation += 1;
        let generation = self.generation;
        let mut cursor = Some(idx);
        while let Some(i) = cursor {
            self.nodes[i].written = generation;
            cursor = self.nodes[i].parent;
        }
        true
    }

    /// Is `path` marked? With `recursive`, any marked descendant also counts.
    ///
    /// Unknown paths are never marked.
    #[must_use]
    pub fn is_marked(&self, path: &str, recursive: bool) -> bool {
        let Some(&idx) = self.index.get(path) else {
            return false;
        };
        if !recursive {
            return self.nodes[idx].is_marked();
        }
        self.subtree(idx).any(|i| self.nodes[i].is_marked())
    }

    /// Clear the mark on `path`, and with `recursive` on all of its descendants.
    ///
    /// Ancestors keep their own marks. Returns `false` for an unknown path.
    pub fn clear(&mut self, path: &str, recursive: bool) -> bool {
        self.acknowledge(path, recursive, u64::MAX)
    }

    /// Clear only the marks written at or before generation `through`.
    ///
    /// Marks from later writes survive, which is what lets a reader clear
    /// exactly the batch it fetched. Returns `false` for an unknown path.
    pub fn acknowledge(&mut self, path: &str, recursive: bool, through: u64) -> bool {
        let Some(&idx) = self.index.get(path) else {
            return false;
        };
        let targets: Vec<usize> = if recursive {
            self.subtree(idx).collect()
        } else {
            vec![idx]
        };
        for i in targets {
            let node = &mut self.nodes[i];
            node.acked = node.acked.max(node.written.min(through));
        }
        true
    }

    /// Leaf paths at or below `path`, or `None` if `path` is unknown.
    #[must_use]
    pub fn leaves_under(&self, path: &str) -> Option<Vec<&str>> {
        let &idx = self.index.get(path)?;
        Some(
            self.subtree(idx)
                .filter(|&i| self.nodes[i].children.is_empty())
                .map(|i| self.nodes[i].path.as_str())
                .collect(),
        )
    }

    /// Marked leaf paths anywhere in the tree, in declaration order.
    #[must_use]
    pub fn marked_leaves(&self) -> Vec<String> {
        self.subtree(0)
            .filter(|&i| self.nodes[i].children.is_empty() && self.nodes[i].is_marked())
            .map(|i| self.nodes[i].path.clone())
            .collect()
    }

    /// Depth-first indices of `root` and everything below it.
    fn subtree(&self, root: usize) -> impl Iterator<Item = usize> + '_ {
        let mut stack = vec![root];
        std::iter::from_fn(move || {
            let idx = stack.pop()?;
            stack.extend(self.nodes[idx].children.iter().rev());
            Some(idx)
        })
    }
}
