//! Node registry indexed by [`NodeKind`].

use std::fmt;

use crate::engine::NodeKind;

/// Registry slot. A node is either not created yet or created, never replaced.
#[derive(Clone, Debug)]
enum Slot<N> {
    Vacant,
    Created(N),
}

/// Every node of the running topology, keyed by kind.
///
/// Nodes are inserted once during construction and dropped together with the
/// graph.
#[derive(Debug)]
pub struct ProcessingGraph<N> {
    slots: Vec<Slot<N>>,
}

impl<N> Default for ProcessingGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> ProcessingGraph<N> {
    pub fn new() -> Self {
        Self { slots: (0..NodeKind::COUNT).map(|_| Slot::Vacant).collect() }
    }

    /// Store the node for `kind`. Returns `false` (and keeps the existing
    /// node) if the slot is already taken.
    pub fn insert(&mut self, kind: NodeKind, node: N) -> bool {
        let slot = &mut self.slots[kind.index()];
        match slot {
            Slot::Vacant => {
                *slot = Slot::Created(node);
                true
            }
            Slot::Created(_) => false,
        }
    }

    pub fn get(&self, kind: NodeKind) -> Option<&N> {
        match &self.slots[kind.index()] {
            Slot::Created(node) => Some(node),
            Slot::Vacant => None,
        }
    }

    /// Like [`get`](Self::get) but reports the missing kind as an error.
    pub fn require(&self, kind: NodeKind) -> Result<&N, MissingNode> {
        self.get(kind).ok_or(MissingNode(kind))
    }

    pub fn contains(&self, kind: NodeKind) -> bool {
        self.get(kind).is_some()
    }

    /// First kind of `candidates` that has been created.
    pub fn first_present(&self, candidates: &[NodeKind]) -> Option<NodeKind> {
        candidates.iter().copied().find(|kind| self.contains(*kind))
    }

    /// Created kinds in registry order.
    pub fn kinds(&self) -> impl Iterator<Item = NodeKind> + '_ {
        NodeKind::ALL.iter().copied().filter(|kind| self.contains(*kind))
    }

    pub fn len(&self) -> usize {
        self.kinds().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A linking operation referenced a node that was never created
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MissingNode(pub NodeKind);

impl fmt::Display for MissingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} does not exist", self.0)
    }
}

impl std::error::Error for MissingNode {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_once() {
        let mut graph = ProcessingGraph::new();
        assert!(graph.is_empty());
        assert!(graph.insert(NodeKind::Tee, "first"));
        assert!(!graph.insert(NodeKind::Tee, "second"));
        assert_eq!(graph.get(NodeKind::Tee), Some(&"first"));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_require_reports_missing_kind() {
        let graph: ProcessingGraph<u32> = ProcessingGraph::new();
        assert_eq!(graph.require(NodeKind::Demux), Err(MissingNode(NodeKind::Demux)));
        assert_eq!(MissingNode(NodeKind::Demux).to_string(), "node Demux does not exist");
    }

    #[test]
    fn test_first_present_follows_candidate_order() {
        let mut graph = ProcessingGraph::new();
        graph.insert(NodeKind::VideoConvert, 1);
        graph.insert(NodeKind::VideoPayload, 2);
        let candidates = [NodeKind::ClockOverlay, NodeKind::VideoConvert, NodeKind::VideoPayload];
        assert_eq!(graph.first_present(&candidates), Some(NodeKind::VideoConvert));
        graph.insert(NodeKind::ClockOverlay, 3);
        assert_eq!(graph.first_present(&candidates), Some(NodeKind::ClockOverlay));
        assert_eq!(graph.kinds().collect::<Vec<_>>().len(), 3);
    }

    #[test]
    fn test_debug_lists_slots() {
        let mut graph = ProcessingGraph::new();
        graph.insert(NodeKind::Demux, 7u32);
        let rendered = format!("{:?}", graph);
        assert!(rendered.contains("Created(7)"));
        assert!(rendered.contains("Vacant"));
    }
}
