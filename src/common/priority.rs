use im::{OrdSet, Vector};
use std::collections::{BTreeSet, VecDeque};

/// Transitively closed "precedes" relation between agents.
///
/// `a` precedes `b` means `a`'s path is treated as a fixed obstacle whenever `b` is planned.
/// Rows are persistent sets, so cloning a graph for a child node shares all untouched rows
/// with its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityGraph {
    higher: Vector<OrdSet<usize>>, // higher[a]: every agent that precedes a
    lower: Vector<OrdSet<usize>>,  // lower[a]: every agent that a precedes
}

impl PriorityGraph {
    pub fn new(num_agents: usize) -> Self {
        PriorityGraph {
            higher: (0..num_agents).map(|_| OrdSet::new()).collect(),
            lower: (0..num_agents).map(|_| OrdSet::new()).collect(),
        }
    }

    pub fn num_agents(&self) -> usize {
        self.higher.len()
    }

    pub fn precedes(&self, a: usize, b: usize) -> bool {
        self.lower[a].contains(&b)
    }

    /// Agents are related when either precedes the other.
    pub fn is_related(&self, a: usize, b: usize) -> bool {
        self.precedes(a, b) || self.precedes(b, a)
    }

    pub fn higher(&self, agent: usize) -> &OrdSet<usize> {
        &self.higher[agent]
    }

    pub fn lower(&self, agent: usize) -> &OrdSet<usize> {
        &self.lower[agent]
    }

    /// Adds `high -> low` together with every ordering it implies.
    ///
    /// Idempotent. Panics if `low` already precedes `high`, since the relation must stay acyclic.
    pub fn add_edge(&mut self, high: usize, low: usize) {
        assert_ne!(high, low, "agent {high} cannot precede itself");
        assert!(
            !self.precedes(low, high),
            "adding {high} -> {low} would close a priority cycle"
        );
        if self.precedes(high, low) {
            return;
        }

        let mut highs = self.higher[high].clone();
        highs.insert(high);
        let mut lows = self.lower[low].clone();
        lows.insert(low);

        for &h in highs.iter() {
            self.lower[h].extend(lows.iter().copied());
        }
        for &l in lows.iter() {
            self.higher[l].extend(highs.iter().copied());
        }
    }

    /// Connected component of `agent` in the undirected view of the graph.
    ///
    /// Traversal stops as soon as the component reaches `size_cap` members.
    pub fn meta_agent(&self, agent: usize, size_cap: usize) -> BTreeSet<usize> {
        let mut meta_agent = BTreeSet::new();
        let mut visited = vec![false; self.num_agents()];
        let mut open = VecDeque::from([agent]);
        visited[agent] = true;

        while let Some(current) = open.pop_front() {
            meta_agent.insert(current);
            if meta_agent.len() >= size_cap {
                break;
            }
            for &other in self.higher[current].iter().chain(self.lower[current].iter()) {
                if !visited[other] {
                    visited[other] = true;
                    open.push_back(other);
                }
            }
        }
        meta_agent
    }

    pub fn same_meta_agent(&self, a: usize, b: usize) -> bool {
        a == b || self.meta_agent(a, usize::MAX).contains(&b)
    }

    pub fn max_meta_agent_size(&self) -> usize {
        (0..self.num_agents())
            .map(|agent| self.meta_agent(agent, usize::MAX).len())
            .max()
            .unwrap_or(0)
    }

    /// `agent` followed by every agent it precedes, each listed after all of its predecessors.
    pub fn topological_from(&self, agent: usize) -> Vec<usize> {
        let mut visited = BTreeSet::new();
        let mut order = VecDeque::new();
        let mut dfs = vec![(false, agent)];

        while let Some((finished, current)) = dfs.pop() {
            if finished {
                order.push_front(current);
                continue;
            }
            if !visited.insert(current) {
                continue;
            }
            dfs.push((true, current));
            for &next in self.lower[current].iter() {
                if !visited.contains(&next) {
                    dfs.push((false, next));
                }
            }
        }
        order.into()
    }
}
