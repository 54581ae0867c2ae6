mod highlevel;
mod lowlevel;
mod priority;

pub(crate) use highlevel::{SearchNode, SearchTree};
pub(crate) use lowlevel::{LowLevelNode, NodeKey};
pub use priority::PriorityGraph;

use serde::{Deserialize, Serialize};
use std::rc::Rc;

use crate::map::{action_between, Map};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: usize,
    pub start: (usize, usize),
    pub goal: (usize, usize),
}

impl Agent {
    pub fn verify(&self, map: &Map) -> bool {
        map.is_passable(self.start.0, self.start.1) && map.is_passable(self.goal.0, self.goal.1)
    }
}

/// One cell per time step; the agent waits at the last cell forever after.
pub type Path = Vec<(usize, usize)>;

/// The path set implied by a search node: one shared path per agent.
pub(crate) type PathSet = Vec<Rc<Path>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub paths: Vec<Path>,
    pub cost: usize,
}

impl Solution {
    pub fn makespan(&self) -> usize {
        self.paths
            .iter()
            .map(|path| path.len().saturating_sub(1))
            .max()
            .unwrap_or(0)
    }

    /// Checks endpoints, move legality, cost bookkeeping and pairwise collision-freedom.
    pub fn verify(&self, map: &Map, agents: &[Agent]) -> bool {
        if self.paths.len() != agents.len() {
            return false;
        }

        for (agent, path) in agents.iter().zip(&self.paths) {
            if path.first() != Some(&agent.start) || path.last() != Some(&agent.goal) {
                return false;
            }
            let legal = path.windows(2).all(|step| {
                map.is_passable(step[1].0, step[1].1) && action_between(step[0], step[1]).is_some()
            });
            if !legal {
                return false;
            }
        }

        let cost: usize = self.paths.iter().map(|path| path.len() - 1).sum();
        if cost != self.cost {
            return false;
        }

        for a1 in 0..self.paths.len() {
            for a2 in (a1 + 1)..self.paths.len() {
                if is_collide(&self.paths[a1], &self.paths[a2]) {
                    return false;
                }
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConflictType {
    Vertex {
        position: (usize, usize),
        time_step: usize,
    },
    /// `u` is where `agent_1` stood at `time_step - 1`, `v` is where `agent_2` stood.
    Edge {
        u: (usize, usize),
        v: (usize, usize),
        time_step: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Conflict {
    pub agent_1: usize,
    pub agent_2: usize,
    pub conflict_type: ConflictType,
}

impl Conflict {
    pub fn time_step(&self) -> usize {
        match self.conflict_type {
            ConflictType::Vertex { time_step, .. } | ConflictType::Edge { time_step, .. } => {
                time_step
            }
        }
    }

    /// Same collision with the agent roles swapped.
    pub fn reversed(&self) -> Conflict {
        let conflict_type = match self.conflict_type {
            ConflictType::Vertex {
                position,
                time_step,
            } => ConflictType::Vertex {
                position,
                time_step,
            },
            ConflictType::Edge { u, v, time_step } => ConflictType::Edge {
                u: v,
                v: u,
                time_step,
            },
        };
        Conflict {
            agent_1: self.agent_2,
            agent_2: self.agent_1,
            conflict_type,
        }
    }
}

/// Earliest collision between two paths whose time step lies in `start_t..=end_t`.
///
/// Vertex conflicts are reported at their time step. A swap between `t` and `t + 1` is
/// reported at `t + 1` and is only examined when `t` is in range. Once the shorter path
/// ends its agent keeps occupying its last cell, and a later visit of that cell by the
/// other agent is reported with the finished agent as `agent_1`.
pub fn find_earliest_conflict(
    a1: usize,
    path1: &[(usize, usize)],
    a2: usize,
    path2: &[(usize, usize)],
    start_t: usize,
    end_t: usize,
) -> Option<Conflict> {
    if a1 == a2 || path1.is_empty() || path2.is_empty() {
        return None;
    }

    let min_path_length = path1.len().min(path2.len());
    for time_step in start_t..min_path_length {
        if time_step > end_t {
            return None;
        }

        let loc1 = path1[time_step];
        let loc2 = path2[time_step];
        if loc1 == loc2 {
            return Some(Conflict {
                agent_1: a1,
                agent_2: a2,
                conflict_type: ConflictType::Vertex {
                    position: loc1,
                    time_step,
                },
            });
        }
        if time_step + 1 < min_path_length
            && loc1 == path2[time_step + 1]
            && loc2 == path1[time_step + 1]
        {
            return Some(Conflict {
                agent_1: a1,
                agent_2: a2,
                conflict_type: ConflictType::Edge {
                    u: loc1,
                    v: loc2,
                    time_step: time_step + 1,
                },
            });
        }
    }

    if path1.len() != path2.len() {
        let (short_agent, short_path, long_agent, long_path) = if path1.len() < path2.len() {
            (a1, path1, a2, path2)
        } else {
            (a2, path2, a1, path1)
        };
        let parked = short_path[short_path.len() - 1];
        for time_step in start_t.max(min_path_length)..long_path.len() {
            if time_step > end_t {
                return None;
            }
            if long_path[time_step] == parked {
                return Some(Conflict {
                    agent_1: short_agent,
                    agent_2: long_agent,
                    conflict_type: ConflictType::Vertex {
                        position: parked,
                        time_step,
                    },
                });
            }
        }
    }

    None
}

pub fn is_collide(path1: &[(usize, usize)], path2: &[(usize, usize)]) -> bool {
    find_earliest_conflict(0, path1, 1, path2, 0, usize::MAX).is_some()
}

pub(crate) fn count_colliding_pairs(paths: &[Rc<Path>]) -> usize {
    let mut result = 0;
    for a1 in 0..paths.len() {
        for a2 in (a1 + 1)..paths.len() {
            if is_collide(&paths[a1], &paths[a2]) {
                result += 1;
            }
        }
    }
    result
}

pub(crate) fn sum_of_costs(paths: &[Rc<Path>]) -> usize {
    paths.iter().map(|path| path.len() - 1).sum()
}

pub(crate) fn makespan(paths: &[Rc<Path>]) -> usize {
    paths
        .iter()
        .map(|path| path.len() - 1)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_conflict() {
        let path1 = vec![(0, 0), (0, 1), (0, 2)];
        let path2 = vec![(1, 1), (0, 1), (1, 1)];
        let conflict = find_earliest_conflict(0, &path1, 1, &path2, 0, usize::MAX).unwrap();
        assert_eq!(
            conflict,
            Conflict {
                agent_1: 0,
                agent_2: 1,
                conflict_type: ConflictType::Vertex {
                    position: (0, 1),
                    time_step: 1
                }
            }
        );
    }

    #[test]
    fn test_edge_conflict_reported_at_arrival_time() {
        let path1 = vec![(0, 0), (0, 1), (0, 2)];
        let path2 = vec![(0, 2), (0, 1), (0, 0)];
        // Vertex conflict at t = 1 comes first.
        let conflict = find_earliest_conflict(0, &path1, 1, &path2, 0, usize::MAX).unwrap();
        assert_eq!(conflict.time_step(), 1);

        let path1 = vec![(0, 0), (0, 1)];
        let path2 = vec![(0, 1), (0, 0)];
        let conflict = find_earliest_conflict(3, &path1, 5, &path2, 0, usize::MAX).unwrap();
        assert_eq!(
            conflict.conflict_type,
            ConflictType::Edge {
                u: (0, 0),
                v: (0, 1),
                time_step: 1
            }
        );
        let reversed = conflict.reversed();
        assert_eq!(reversed.agent_1, 5);
        assert_eq!(
            reversed.conflict_type,
            ConflictType::Edge {
                u: (0, 1),
                v: (0, 0),
                time_step: 1
            }
        );
    }

    #[test]
    fn test_target_conflict_lists_parked_agent_first() {
        let parked = vec![(1, 1), (1, 2)];
        let passing = vec![(0, 0), (0, 1), (0, 2), (1, 2), (2, 2)];
        let conflict = find_earliest_conflict(4, &passing, 7, &parked, 0, usize::MAX).unwrap();
        assert_eq!(conflict.agent_1, 7);
        assert_eq!(conflict.agent_2, 4);
        assert_eq!(conflict.time_step(), 3);
    }

    #[test]
    fn test_time_window() {
        let path1 = vec![(0, 0), (0, 1), (0, 2), (0, 3)];
        let path2 = vec![(1, 0), (1, 1), (1, 2), (0, 3)];
        assert!(find_earliest_conflict(0, &path1, 1, &path2, 0, 2).is_none());
        assert!(find_earliest_conflict(0, &path1, 1, &path2, 3, 3).is_some());
        assert!(find_earliest_conflict(0, &path1, 0, &path2, 0, usize::MAX).is_none());
    }

    #[test]
    fn test_count_colliding_pairs() {
        let paths: PathSet = vec![
            Rc::new(vec![(0, 0), (0, 1)]),
            Rc::new(vec![(0, 1), (0, 0)]),
            Rc::new(vec![(2, 2)]),
        ];
        assert_eq!(count_colliding_pairs(&paths), 1);
        assert_eq!(sum_of_costs(&paths), 2);
        assert_eq!(makespan(&paths), 1);
    }

    #[test]
    fn test_solution_verify() {
        let map = Map::from_rows(&["..."]);
        let agents = vec![
            Agent {
                id: 0,
                start: (0, 0),
                goal: (0, 2),
            },
            Agent {
                id: 1,
                start: (0, 2),
                goal: (0, 0),
            },
        ];
        let colliding = Solution {
            paths: vec![vec![(0, 0), (0, 1), (0, 2)], vec![(0, 2), (0, 1), (0, 0)]],
            cost: 4,
        };
        assert!(!colliding.verify(&map, &agents));

        let teleporting = Solution {
            paths: vec![vec![(0, 0), (0, 2)], vec![(0, 2), (0, 2), (0, 0)]],
            cost: 3,
        };
        assert!(!teleporting.verify(&map, &agents));
    }
}
