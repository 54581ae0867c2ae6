use crate::common::{find_earliest_conflict, Conflict, Path, PriorityGraph, SearchNode};

use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::rc::Rc;
use tracing::trace;

/// Which colliding pair a search node branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictSelection {
    /// Lexicographically first colliding pair.
    Exhaustive,
    /// First colliding pair under a shuffled agent order.
    Random,
    /// Earliest time step with a collision, pairs scanned in shuffled order.
    EarliestTime,
    /// Pair whose two meta-agents are smallest together.
    MinMetaAgent,
    /// Pair whose two meta-agents are largest together.
    MaxMetaAgent,
    /// Agents touched by recent branches first, oldest first.
    FrontierBfs,
    /// Agents touched by recent branches first, newest first.
    FrontierDfs,
    /// Ordering that creates the fewest implied priority pairs.
    MinConstraints,
    /// Ordering that creates the most implied priority pairs.
    MaxConstraints,
}

impl ConflictSelection {
    pub(crate) fn uses_frontier(self) -> bool {
        matches!(self, ConflictSelection::FrontierBfs | ConflictSelection::FrontierDfs)
    }

    /// Whether the child asserting `agent_1 -> agent_2` is preferred over its sibling.
    pub(crate) fn orients_conflicts(self) -> bool {
        matches!(
            self,
            ConflictSelection::MinConstraints | ConflictSelection::MaxConstraints
        )
    }

    /// Picks the conflict `node` branches on, `None` if its paths are collision-free.
    ///
    /// On non-root nodes collisions inside the meta-agent of the last replanned agent always
    /// come first.
    pub(crate) fn select(
        self,
        node: &mut SearchNode,
        paths: &[Rc<Path>],
        rng: &mut StdRng,
    ) -> Option<Conflict> {
        if let Some(agent) = node.agent_id {
            if let Some(conflict) = internal_conflict(&node.priorities, agent, paths) {
                trace!("internal conflict of meta-agent {agent}: {conflict:?}");
                return Some(conflict);
            }
        }

        match self {
            ConflictSelection::Exhaustive => exhaustive(paths, 0..paths.len()),
            ConflictSelection::Random => random(paths, rng),
            ConflictSelection::EarliestTime => earliest_time(paths, rng),
            ConflictSelection::MinMetaAgent if !node.is_root() => {
                meta_agent_sized(&node.priorities, paths, false)
            }
            ConflictSelection::MaxMetaAgent if !node.is_root() => {
                meta_agent_sized(&node.priorities, paths, true)
            }
            ConflictSelection::FrontierBfs if !node.is_root() => frontier(node, paths, false),
            ConflictSelection::FrontierDfs if !node.is_root() => frontier(node, paths, true),
            ConflictSelection::MinMetaAgent
            | ConflictSelection::MaxMetaAgent
            | ConflictSelection::FrontierBfs
            | ConflictSelection::FrontierDfs => exhaustive(paths, 0..paths.len()),
            ConflictSelection::MinConstraints => by_constraints(&node.priorities, paths, false),
            ConflictSelection::MaxConstraints => by_constraints(&node.priorities, paths, true),
        }
    }
}

fn earliest(paths: &[Rc<Path>], a1: usize, a2: usize) -> Option<Conflict> {
    find_earliest_conflict(a1, &paths[a1], a2, &paths[a2], 0, usize::MAX)
}

fn internal_conflict(
    priorities: &PriorityGraph,
    agent: usize,
    paths: &[Rc<Path>],
) -> Option<Conflict> {
    let meta_agent: Vec<usize> = priorities.meta_agent(agent, usize::MAX).into_iter().collect();
    for (i, &a1) in meta_agent.iter().enumerate() {
        for &a2 in &meta_agent[i + 1..] {
            if let Some(conflict) = earliest(paths, a1, a2) {
                return Some(conflict);
            }
        }
    }
    None
}

fn exhaustive(paths: &[Rc<Path>], agents: impl IntoIterator<Item = usize>) -> Option<Conflict> {
    let agents: Vec<usize> = agents.into_iter().collect();
    for (i, &a1) in agents.iter().enumerate() {
        for &a2 in &agents[i + 1..] {
            if let Some(conflict) = earliest(paths, a1, a2) {
                return Some(conflict);
            }
        }
    }
    None
}

fn shuffled_agents(num_agents: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut agents: Vec<usize> = (0..num_agents).collect();
    agents.shuffle(rng);
    agents
}

fn random(paths: &[Rc<Path>], rng: &mut StdRng) -> Option<Conflict> {
    exhaustive(paths, shuffled_agents(paths.len(), rng))
}

fn earliest_time(paths: &[Rc<Path>], rng: &mut StdRng) -> Option<Conflict> {
    let agents = shuffled_agents(paths.len(), rng);
    let makespan = paths.iter().map(|path| path.len() - 1).max().unwrap_or(0);

    for time_step in 0..=makespan {
        for (i, &a1) in agents.iter().enumerate() {
            for &a2 in &agents[i + 1..] {
                let conflict =
                    find_earliest_conflict(a1, &paths[a1], a2, &paths[a2], time_step, time_step);
                if conflict.is_some() {
                    return conflict;
                }
            }
        }
    }
    None
}

// Among external collisions, the ones with the smallest (largest) merged meta-agent, earliest first.
fn meta_agent_sized(
    priorities: &PriorityGraph,
    paths: &[Rc<Path>],
    largest: bool,
) -> Option<Conflict> {
    let mut best_size = if largest { 0 } else { usize::MAX };
    let mut best: Option<Conflict> = None;

    for a1 in 0..paths.len() {
        // Smallest-first never needs to look past the current best size.
        let cap = if largest {
            usize::MAX
        } else {
            best_size.saturating_add(1)
        };
        let meta_agent_1 = priorities.meta_agent(a1, cap);
        if !largest && meta_agent_1.len() > best_size {
            continue;
        }

        for a2 in (a1 + 1)..paths.len() {
            if meta_agent_1.contains(&a2) {
                continue;
            }
            let meta_agent_2 = priorities.meta_agent(a2, cap);
            let size = meta_agent_1.len() + meta_agent_2.len();
            let qualifies = if largest {
                size >= best_size
            } else {
                size <= best_size
            };
            if !qualifies {
                continue;
            }

            let Some(conflict) = earliest(paths, a1, a2) else {
                continue;
            };
            let strictly_better = if largest {
                size > best_size
            } else {
                size < best_size
            };
            let earlier = best
                .as_ref()
                .is_none_or(|best| conflict.time_step() < best.time_step());
            if strictly_better || earlier {
                best_size = size;
                best = Some(conflict);
            }
        }
    }
    best
}

fn frontier(node: &mut SearchNode, paths: &[Rc<Path>], newest_first: bool) -> Option<Conflict> {
    let mut remaining: BTreeSet<usize> = (0..paths.len()).collect();

    loop {
        let top = if newest_first {
            node.frontier.back()
        } else {
            node.frontier.front()
        };
        let Some(&top) = top else {
            break;
        };

        for other in 0..paths.len() {
            if other == top || node.priorities.is_related(top, other) {
                continue;
            }
            if let Some(conflict) = earliest(paths, top, other) {
                return Some(conflict);
            }
        }

        // Nothing left to resolve around this agent.
        if newest_first {
            node.frontier.pop_back();
        } else {
            node.frontier.pop_front();
        }
        remaining.remove(&top);
    }

    exhaustive(paths, remaining)
}

fn num_constraints(priorities: &PriorityGraph, high: usize, low: usize) -> usize {
    (priorities.higher(high).len() + 1) * (priorities.lower(low).len() + 1)
}

// Conflicts come back oriented so that `agent_1 -> agent_2` is the ordering with the best score.
fn by_constraints(
    priorities: &PriorityGraph,
    paths: &[Rc<Path>],
    maximize: bool,
) -> Option<Conflict> {
    let mut best_score = if maximize { 0 } else { usize::MAX };
    let mut best: Option<Conflict> = None;

    for a1 in 0..paths.len() {
        for a2 in (a1 + 1)..paths.len() {
            let Some(conflict) = earliest(paths, a1, a2) else {
                continue;
            };
            for (high, low) in [(a1, a2), (a2, a1)] {
                let score = num_constraints(priorities, high, low);
                let better = if maximize {
                    score > best_score
                } else {
                    score < best_score
                };
                if better {
                    best_score = score;
                    best = Some(if conflict.agent_1 == high {
                        conflict.clone()
                    } else {
                        conflict.reversed()
                    });
                }
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::collections::VecDeque;

    fn node(priorities: PriorityGraph, agent_id: Option<usize>) -> SearchNode {
        SearchNode {
            parent: agent_id.map(|_| 0),
            agent_id,
            new_paths: Vec::new(),
            priorities,
            cost: 0,
            depth: 0,
            makespan: 0,
            num_colliding_pairs: 0,
            time_generated: 1,
            time_expanded: None,
            conflict: None,
            frontier: VecDeque::new(),
        }
    }

    fn shared(paths: Vec<Path>) -> Vec<Rc<Path>> {
        paths.into_iter().map(Rc::new).collect()
    }

    // 0 and 1 collide at t = 2, 2 and 3 collide at t = 1, 4 is alone.
    fn crossing_paths() -> Vec<Rc<Path>> {
        shared(vec![
            vec![(0, 0), (0, 1), (0, 2)],
            vec![(1, 2), (1, 1), (0, 2)],
            vec![(3, 0), (3, 1), (3, 2)],
            vec![(4, 1), (3, 1), (2, 1)],
            vec![(6, 6)],
        ])
    }

    #[test]
    fn test_collision_free_paths_yield_nothing() {
        let paths = shared(vec![vec![(0, 0), (0, 1)], vec![(1, 0), (1, 1)]]);
        let mut rng = StdRng::seed_from_u64(0);
        for policy in ConflictSelection::value_variants() {
            let mut root = node(PriorityGraph::new(2), None);
            assert!(policy.select(&mut root, &paths, &mut rng).is_none());
            let mut child = node(PriorityGraph::new(2), Some(1));
            assert!(policy.select(&mut child, &paths, &mut rng).is_none());
        }
    }

    #[test]
    fn test_every_policy_finds_a_real_conflict() {
        let paths = crossing_paths();
        let mut rng = StdRng::seed_from_u64(7);
        for policy in ConflictSelection::value_variants() {
            let mut root = node(PriorityGraph::new(5), None);
            let conflict = policy.select(&mut root, &paths, &mut rng).unwrap();
            let pair = BTreeSet::from([conflict.agent_1, conflict.agent_2]);
            assert!(
                pair == BTreeSet::from([0, 1]) || pair == BTreeSet::from([2, 3]),
                "{policy:?} picked {conflict:?}"
            );
        }
    }

    #[test]
    fn test_exhaustive_and_earliest_time() {
        let paths = crossing_paths();
        let mut rng = StdRng::seed_from_u64(3);
        let mut root = node(PriorityGraph::new(5), None);

        let conflict = ConflictSelection::Exhaustive
            .select(&mut root, &paths, &mut rng)
            .unwrap();
        assert_eq!((conflict.agent_1, conflict.agent_2), (0, 1));

        let conflict = ConflictSelection::EarliestTime
            .select(&mut root, &paths, &mut rng)
            .unwrap();
        assert_eq!(conflict.time_step(), 1);
    }

    #[test]
    fn test_internal_conflict_comes_first() {
        let paths = crossing_paths();
        let mut priorities = PriorityGraph::new(5);
        priorities.add_edge(2, 3);
        priorities.add_edge(4, 3);
        let mut rng = StdRng::seed_from_u64(0);

        for policy in ConflictSelection::value_variants() {
            let mut child = node(priorities.clone(), Some(4));
            let conflict = policy.select(&mut child, &paths, &mut rng).unwrap();
            assert_eq!(
                BTreeSet::from([conflict.agent_1, conflict.agent_2]),
                BTreeSet::from([2, 3]),
                "{policy:?}"
            );
        }
    }

    #[test]
    fn test_meta_agent_size_policies() {
        let paths = crossing_paths();
        let mut priorities = PriorityGraph::new(5);
        // Grow the meta-agent of agent 2 without touching 0 and 1.
        priorities.add_edge(4, 2);
        let mut rng = StdRng::seed_from_u64(0);

        let mut child = node(priorities.clone(), Some(0));
        let smallest = ConflictSelection::MinMetaAgent
            .select(&mut child, &paths, &mut rng)
            .unwrap();
        assert_eq!((smallest.agent_1, smallest.agent_2), (0, 1));

        let mut child = node(priorities, Some(0));
        let largest = ConflictSelection::MaxMetaAgent
            .select(&mut child, &paths, &mut rng)
            .unwrap();
        assert_eq!((largest.agent_1, largest.agent_2), (2, 3));
    }

    #[test]
    fn test_frontier_policies() {
        let paths = crossing_paths();
        let mut rng = StdRng::seed_from_u64(0);

        let mut child = node(PriorityGraph::new(5), Some(4));
        child.frontier = VecDeque::from([4, 3]);
        let conflict = ConflictSelection::FrontierBfs
            .select(&mut child, &paths, &mut rng)
            .unwrap();
        assert_eq!((conflict.agent_1, conflict.agent_2), (3, 2));
        // Agent 4 has no conflicts and leaves the frontier.
        assert_eq!(child.frontier, VecDeque::from([3]));

        let mut child = node(PriorityGraph::new(5), Some(4));
        child.frontier = VecDeque::from([1, 4]);
        let conflict = ConflictSelection::FrontierDfs
            .select(&mut child, &paths, &mut rng)
            .unwrap();
        assert_eq!((conflict.agent_1, conflict.agent_2), (1, 0));
        assert_eq!(child.frontier, VecDeque::from([1]));
    }

    #[test]
    fn test_constraint_policies_orient_conflicts() {
        let paths = shared(vec![
            vec![(0, 0), (0, 1), (0, 2)],
            vec![(1, 1), (0, 1), (1, 1)],
            vec![(5, 5)],
        ]);
        let mut priorities = PriorityGraph::new(3);
        priorities.add_edge(2, 0);
        let mut rng = StdRng::seed_from_u64(0);

        // 0 -> 1 implies 2 -> 1 too, 1 -> 0 adds nothing new.
        let mut root = node(priorities.clone(), None);
        let conflict = ConflictSelection::MinConstraints
            .select(&mut root, &paths, &mut rng)
            .unwrap();
        assert_eq!((conflict.agent_1, conflict.agent_2), (1, 0));

        let mut root = node(priorities, None);
        let conflict = ConflictSelection::MaxConstraints
            .select(&mut root, &paths, &mut rng)
            .unwrap();
        assert_eq!((conflict.agent_1, conflict.agent_2), (0, 1));
    }
}
