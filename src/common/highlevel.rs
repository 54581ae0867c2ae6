use super::{count_colliding_pairs, makespan, sum_of_costs, Conflict, Path, PathSet, PriorityGraph};

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::rc::Rc;

/// One node of the priority search tree.
///
/// A node stores only the paths replanned when it was generated; the full path set is
/// recovered by walking to the root through [`SearchTree::paths_of`].
#[derive(Debug, Clone)]
pub(crate) struct SearchNode {
    pub(crate) parent: Option<usize>,
    pub(crate) agent_id: Option<usize>, // agent whose replanning created this node, none for the root
    pub(crate) new_paths: Vec<(usize, Rc<Path>)>,
    pub(crate) priorities: PriorityGraph,
    pub(crate) cost: usize,
    pub(crate) depth: usize,
    pub(crate) makespan: usize,
    pub(crate) num_colliding_pairs: usize,
    pub(crate) time_generated: usize,
    pub(crate) time_expanded: Option<usize>,
    pub(crate) conflict: Option<Conflict>,
    pub(crate) frontier: VecDeque<usize>, // agents of interest for frontier conflict selection
}

impl SearchNode {
    pub(crate) fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub(crate) fn open_entry(&self, id: usize) -> OpenEntry {
        OpenEntry {
            depth: self.depth,
            cost: self.cost,
            num_colliding_pairs: self.num_colliding_pairs,
            time_generated: self.time_generated,
            id,
        }
    }
}

/// Arena of search nodes. Index 0 is the root and nodes are never removed.
#[derive(Debug)]
pub(crate) struct SearchTree {
    nodes: Vec<SearchNode>,
    initial_paths: PathSet,
}

impl SearchTree {
    pub(crate) const ROOT: usize = 0;

    pub(crate) fn new(initial_paths: Vec<Path>, priorities: PriorityGraph) -> Self {
        let initial_paths: PathSet = initial_paths.into_iter().map(Rc::new).collect();
        let root = SearchNode {
            parent: None,
            agent_id: None,
            new_paths: Vec::new(),
            priorities,
            cost: sum_of_costs(&initial_paths),
            depth: 0,
            makespan: makespan(&initial_paths),
            num_colliding_pairs: count_colliding_pairs(&initial_paths),
            time_generated: 1,
            time_expanded: None,
            conflict: None,
            frontier: VecDeque::new(),
        };

        SearchTree {
            nodes: vec![root],
            initial_paths,
        }
    }

    pub(crate) fn get(&self, id: usize) -> &SearchNode {
        &self.nodes[id]
    }

    pub(crate) fn get_mut(&mut self, id: usize) -> &mut SearchNode {
        &mut self.nodes[id]
    }

    pub(crate) fn push(&mut self, node: SearchNode) -> usize {
        assert!(
            node.parent.is_some_and(|parent| parent < self.nodes.len()),
            "child node must reference an existing parent"
        );
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Path set implied by node `id`: the closest replanned path for every agent, the root's otherwise.
    pub(crate) fn paths_of(&self, id: usize) -> PathSet {
        let mut paths = self.initial_paths.clone();
        let mut updated = vec![false; paths.len()];

        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id];
            for (agent, path) in &node.new_paths {
                if !updated[*agent] {
                    paths[*agent] = Rc::clone(path);
                    updated[*agent] = true;
                }
            }
            current = node.parent;
        }
        paths
    }

    /// Node ids from the root down to `id`.
    pub(crate) fn branch(&self, id: usize) -> Vec<usize> {
        let mut branch = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            branch.push(node_id);
            current = self.nodes[node_id].parent;
        }
        branch.reverse();
        branch
    }

    /// Drops the frontier once a node has been branched on. The chosen conflict stays for the
    /// branch trace.
    pub(crate) fn close(&mut self, id: usize) {
        self.nodes[id].frontier = VecDeque::new();
    }
}

/// Open list handle of a node, ordered so that `BinaryHeap` pops the best node first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpenEntry {
    pub(crate) depth: usize,
    pub(crate) cost: usize,
    pub(crate) num_colliding_pairs: usize,
    pub(crate) time_generated: usize,
    pub(crate) id: usize,
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Deeper nodes first
        self.depth
            .cmp(&other.depth)
            .then_with(|| other.cost.cmp(&self.cost))
            .then_with(|| other.num_colliding_pairs.cmp(&self.num_colliding_pairs))
            // Earlier generated nodes first
            .then_with(|| other.time_generated.cmp(&self.time_generated))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
