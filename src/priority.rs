//! Dependency and weight bookkeeping for stream prioritisation.
//!
//! The tree stores stream ids, never stream objects: the connection's stream
//! table is the sole owner of streams, and a retired stream simply disappears
//! from the tree. Stream 0 is the permanent root.

use crate::error::{H2Error, H2Result};
use crate::types::StreamId;
use log::trace;
use std::collections::{HashMap, HashSet};

pub const DEFAULT_WEIGHT: u16 = 16;

#[derive(Debug, Clone)]
struct Node {
    parent: StreamId,
    weight: u16,
    dependees: HashSet<StreamId>,
}

impl Node {
    fn new() -> Self {
        Self {
            parent: 0,
            weight: DEFAULT_WEIGHT,
            dependees: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PriorityTree {
    nodes: HashMap<StreamId, Node>,
}

impl Default for PriorityTree {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        // the root; its parent field is never read
        nodes.insert(0, Node::new());
        Self { nodes }
    }
}

impl PriorityTree {
    /// Registers a stream with default priority (a dependee of the root).
    pub fn ensure(&mut self, id: StreamId) {
        if id == 0 || self.nodes.contains_key(&id) {
            return;
        }
        self.nodes.insert(id, Node::new());
        self.root_mut().dependees.insert(id);
    }

    /// Makes `dependent` depend on `parent`, re-parenting as required by
    /// https://httpwg.org/specs/rfc7540.html#reprioritize.
    ///
    /// If the insertion would create a cycle (the new parent is currently a
    /// descendant of `dependent`), the parent subtree is first moved up to
    /// `dependent`'s position, non-exclusively. An exclusive insertion makes
    /// `dependent` adopt all of `parent`'s current dependees.
    pub fn reprioritise(
        &mut self,
        dependent: StreamId,
        parent: StreamId,
        exclusive: bool,
    ) -> H2Result<()> {
        if dependent == 0 {
            return Err(H2Error::protocol("stream 0 may not depend on a stream"));
        }
        if dependent == parent {
            return Err(H2Error::protocol(format!(
                "stream {} may not depend on itself",
                dependent
            )));
        }
        let mut parent = parent;
        if parent != 0 && !self.nodes.contains_key(&parent) {
            // a dependency on a stream absent from the tree means default
            // priority, i.e. a dependency on the root
            trace!(
                "stream {} depends on unknown stream {}, using the root",
                dependent,
                parent
            );
            parent = 0;
        }
        self.ensure(dependent);

        if parent != 0 && self.is_ancestor(dependent, parent) {
            let grandparent = self.nodes[&dependent].parent;
            self.detach(parent);
            self.attach(parent, grandparent);
        }

        self.detach(dependent);
        if exclusive {
            let adopted: Vec<StreamId> =
                self.nodes[&parent].dependees.iter().copied().collect();
            for child in adopted {
                self.detach(child);
                self.attach(child, dependent);
            }
        }
        self.attach(dependent, parent);
        Ok(())
    }

    /// Weight comes off the wire as `weight_raw + 1`, so always 1..=256.
    pub fn set_weight(&mut self, id: StreamId, weight: u16) {
        debug_assert!((1..=256).contains(&weight), "weight {} out of range", weight);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.weight = weight.clamp(1, 256);
        }
    }

    #[must_use]
    pub fn weight(&self, id: StreamId) -> Option<u16> {
        self.nodes.get(&id).map(|node| node.weight)
    }

    #[must_use]
    pub fn parent_of(&self, id: StreamId) -> Option<StreamId> {
        if id == 0 {
            return None;
        }
        self.nodes.get(&id).map(|node| node.parent)
    }

    #[must_use]
    pub fn dependees_of(&self, id: StreamId) -> Vec<StreamId> {
        let mut dependees: Vec<StreamId> = self
            .nodes
            .get(&id)
            .map(|node| node.dependees.iter().copied().collect())
            .unwrap_or_default();
        dependees.sort_unstable();
        dependees
    }

    /// Drops a stream from the tree; its dependees move to its parent.
    pub fn retire(&mut self, id: StreamId) {
        if id == 0 {
            return;
        }
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(&node.parent) {
            parent.dependees.remove(&id);
        }
        for child in node.dependees {
            if let Some(orphan) = self.nodes.get_mut(&child) {
                orphan.parent = node.parent;
            }
            if let Some(parent) = self.nodes.get_mut(&node.parent) {
                parent.dependees.insert(child);
            }
        }
    }

    fn is_ancestor(&self, candidate: StreamId, of: StreamId) -> bool {
        let mut cursor = of;
        while cursor != 0 {
            if cursor == candidate {
                return true;
            }
            cursor = self.nodes.get(&cursor).map_or(0, |node| node.parent);
        }
        false
    }

    fn detach(&mut self, id: StreamId) {
        let parent = self.nodes[&id].parent;
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.dependees.remove(&id);
        }
        self.nodes.get_mut(&id).expect("detached unknown stream").parent = 0;
    }

    fn attach(&mut self, id: StreamId, parent: StreamId) {
        self.nodes.get_mut(&id).expect("attached unknown stream").parent = parent;
        self.nodes
            .get_mut(&parent)
            .expect("attached to unknown parent")
            .dependees
            .insert(id);
    }

    fn root_mut(&mut self) -> &mut Node {
        self.nodes.get_mut(&0).expect("priority tree lost its root")
    }
}
