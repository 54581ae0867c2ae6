use super::{BudgetReason, SolveError, Solver};
use crate::algorithm::{focal_search, AvoidanceTables};
use crate::common::{
    count_colliding_pairs, find_earliest_conflict, is_collide, sum_of_costs, Agent, Conflict, Path,
    PathSet, PriorityGraph, SearchNode, SearchTree, Solution,
};
use crate::config::Config;
use crate::map::{Heuristic, Map};
use crate::stat::Stats;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BinaryHeap, VecDeque};
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, error, info, trace};

/// One node on the branch from the root to the solution node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchStep {
    pub time_generated: usize,
    pub time_expanded: Option<usize>,
    pub cost: usize,
    /// The conflict the node was branched on, `None` for the solution node.
    pub conflict: Option<Conflict>,
    priorities: PriorityGraph,
}

impl BranchStep {
    pub fn max_meta_agent_size(&self) -> usize {
        self.priorities.max_meta_agent_size()
    }
}

/// Priority-Based Search.
///
/// Each search node fixes a partial order over the agents. A node is expanded by picking one
/// colliding pair and branching on which of the two agents yields, after which the yielding
/// agent and every agent below it whose path became invalid are replanned.
pub struct PBS {
    agents: Vec<Agent>,
    map: Map,
    heuristics: Vec<Heuristic>,
    stats: Stats,
    branch_trace: Vec<BranchStep>,
}

impl PBS {
    /// Agent ids must be their indices in `agents`.
    pub fn new(agents: Vec<Agent>, map: &Map) -> Self {
        for (index, agent) in agents.iter().enumerate() {
            assert_eq!(agent.id, index, "agent ids must match their positions");
        }

        let preprocessing_start = Instant::now();
        let heuristics = agents
            .iter()
            .map(|agent| map.heuristic_dji(agent.goal))
            .collect();

        PBS {
            agents,
            map: map.clone(),
            heuristics,
            stats: Stats {
                runtime_preprocessing: preprocessing_start.elapsed(),
                ..Default::default()
            },
            branch_trace: Vec::new(),
        }
    }

    /// Root-to-solution branch of the last successful run.
    pub fn branch_trace(&self) -> &[BranchStep] {
        &self.branch_trace
    }

    /// Plans `agent` against the other agents' current `paths`.
    fn plan<'a>(
        &mut self,
        agent: usize,
        priorities: &PriorityGraph,
        paths: impl IntoIterator<Item = (usize, &'a Path)>,
        config: &Config,
    ) -> Option<Path> {
        self.stats.num_single_pathfinding += 1;
        let tables = AvoidanceTables::build(&self.map, agent, priorities, paths);
        let low_level_start = Instant::now();
        let path = focal_search(
            &self.map,
            &self.agents[agent],
            &self.heuristics[agent],
            config.sub_optimal,
            &tables,
            &mut self.stats,
        );
        self.stats.runtime_low_level += low_level_start.elapsed();
        path
    }

    fn check_time_limit(&mut self, config: &Config, start: Instant) -> Result<(), SolveError> {
        if start.elapsed() > config.time_limit() {
            return Err(self.budget_exceeded(BudgetReason::TimeLimit, start));
        }
        Ok(())
    }

    fn budget_exceeded(&mut self, reason: BudgetReason, start: Instant) -> SolveError {
        self.stats.runtime = start.elapsed();
        info!("stop search: {reason} reached");
        SolveError::BudgetExceeded {
            reason,
            stats: Box::new(self.stats.clone()),
        }
    }

    // Agents in index order, each one softly avoiding the agents planned before it.
    fn independent_root(&mut self, config: &Config) -> Result<SearchTree, SolveError> {
        let priorities = PriorityGraph::new(self.agents.len());
        let mut paths: Vec<Path> = Vec::with_capacity(self.agents.len());

        for agent in 0..self.agents.len() {
            let Some(path) = self.plan(agent, &priorities, paths.iter().enumerate(), config) else {
                error!("agent {agent} cannot reach its goal");
                self.stats.agent_itself_failed += 1;
                return Err(SolveError::Exhausted);
            };
            paths.push(path);
        }

        Ok(SearchTree::new(paths, priorities))
    }

    // Plans agents one by one in a shuffled total order, reshuffling whenever one gets stuck.
    fn fixed_priority_root(
        &mut self,
        config: &Config,
        rng: &mut StdRng,
        start: Instant,
    ) -> Result<SearchTree, SolveError> {
        let num_agents = self.agents.len();

        'restart: loop {
            self.check_time_limit(config, start)?;

            let mut order: Vec<usize> = (0..num_agents).collect();
            order.shuffle(rng);
            debug!("fixed priority order: {order:?}");

            let mut priorities = PriorityGraph::new(num_agents);
            let mut paths: Vec<Option<Path>> = vec![None; num_agents];

            for (rank, &agent) in order.iter().enumerate() {
                let placed = paths
                    .iter()
                    .enumerate()
                    .filter_map(|(other, path)| path.as_ref().map(|path| (other, path)));
                let Some(path) = self.plan(agent, &priorities, placed, config) else {
                    debug!("agent {agent} failed at rank {rank}, restart");
                    self.stats.fixed_priority_restarts += 1;
                    continue 'restart;
                };
                paths[agent] = Some(path);

                for &later in &order[rank + 1..] {
                    priorities.add_edge(agent, later);
                }
            }

            let paths = paths.into_iter().flatten().collect();
            return Ok(SearchTree::new(paths, priorities));
        }
    }

    fn search(
        &mut self,
        config: &Config,
        rng: &mut StdRng,
        start: Instant,
    ) -> Result<Solution, SolveError> {
        let mut tree = if config.fixed_priority {
            self.fixed_priority_root(config, rng, start)?
        } else {
            self.independent_root(config)?
        };

        let root = tree.get(SearchTree::ROOT);
        self.stats.root_cost = root.cost;
        self.stats.high_level_generated = 1;
        info!(
            "root: cost {}, makespan {}, colliding pairs {}",
            root.cost, root.makespan, root.num_colliding_pairs
        );

        let mut open = BinaryHeap::from([root.open_entry(SearchTree::ROOT)]);

        while !open.is_empty() {
            self.check_time_limit(config, start)?;

            let list_start = Instant::now();
            let Some(entry) = open.pop() else {
                break;
            };
            self.stats.runtime_list_operation += list_start.elapsed();
            let id = entry.id;

            let update_start = Instant::now();
            let paths = tree.paths_of(id);
            self.stats.runtime_update_paths += update_start.elapsed();

            let detection_start = Instant::now();
            let conflict = config
                .conflict_selection
                .select(tree.get_mut(id), &paths, rng);
            self.stats.runtime_conflict_detection += detection_start.elapsed();

            let Some(conflict) = conflict else {
                return self.finish(&tree, id, &paths);
            };
            // Only expansions count against the cap, so a node popped at the cap may still finish.
            if self.stats.high_level_expanded >= config.node_limit {
                return Err(self.budget_exceeded(BudgetReason::NodeLimit, start));
            }

            self.stats.num_total_conflicts += 1;
            self.stats.high_level_expanded += 1;
            let node = tree.get_mut(id);
            if node
                .priorities
                .same_meta_agent(conflict.agent_1, conflict.agent_2)
            {
                self.stats.num_internal_conflicts += 1;
            } else {
                self.stats.num_external_conflicts += 1;
            }
            node.time_expanded = Some(self.stats.high_level_expanded);
            node.conflict = Some(conflict.clone());
            debug!(
                "expand node {id} (depth {}, cost {}, colliding pairs {}): {conflict:?}",
                node.depth, node.cost, node.num_colliding_pairs
            );

            let children = self.branch(&tree, id, &conflict, &paths, config);
            self.stats.record_children(children.len());

            let list_start = Instant::now();
            for child in children {
                let child_id = tree.push(child);
                open.push(tree.get(child_id).open_entry(child_id));
            }
            self.stats.runtime_list_operation += list_start.elapsed();

            tree.close(id);
        }

        info!(
            "open list exhausted after {} expansions",
            self.stats.high_level_expanded
        );
        Err(SolveError::Exhausted)
    }

    // Up to two children: `agent_2 -> agent_1` replanning agent_1, and `agent_1 -> agent_2`
    // replanning agent_2. An ordering that contradicts the parent's is never tried.
    fn branch(
        &mut self,
        tree: &SearchTree,
        id: usize,
        conflict: &Conflict,
        paths: &PathSet,
        config: &Config,
    ) -> Vec<SearchNode> {
        let parent = tree.get(id);
        let (a1, a2) = (conflict.agent_1, conflict.agent_2);
        let mut children = Vec::with_capacity(2);

        if !parent.priorities.precedes(a1, a2) {
            if let Some(mut child) = self.generate_child(parent, id, a2, a1, paths, config) {
                if config.conflict_selection.uses_frontier() {
                    child.frontier = extend_frontier(&parent.frontier, [a2, a1]);
                }
                children.push(child);
            }
        }

        if !parent.priorities.precedes(a2, a1) {
            if let Some(mut child) = self.generate_child(parent, id, a1, a2, paths, config) {
                if config.conflict_selection.orients_conflicts() {
                    child.depth += 1;
                }
                if config.conflict_selection.uses_frontier() {
                    child.frontier = extend_frontier(&parent.frontier, [a1, a2]);
                }
                children.push(child);
            }
        }

        children
    }

    fn generate_child(
        &mut self,
        parent: &SearchNode,
        parent_id: usize,
        high: usize,
        low: usize,
        paths: &PathSet,
        config: &Config,
    ) -> Option<SearchNode> {
        let generate_start = Instant::now();

        let mut priorities = parent.priorities.clone();
        priorities.add_edge(high, low);
        let mut child = SearchNode {
            parent: Some(parent_id),
            agent_id: Some(low),
            new_paths: Vec::new(),
            priorities,
            cost: parent.cost,
            depth: parent.depth + 1,
            makespan: parent.makespan,
            num_colliding_pairs: 0,
            time_generated: 0,
            time_expanded: None,
            conflict: None,
            frontier: VecDeque::new(),
        };

        // Each child starts from the parent's path set, never from its sibling's.
        let mut paths = paths.clone();
        let replanned = self.replan(&mut child, low, &mut paths, config);
        if replanned {
            child.num_colliding_pairs = count_colliding_pairs(&paths);
            self.stats.high_level_generated += 1;
            child.time_generated = self.stats.high_level_generated;
            trace!(
                "generate child {} of node {parent_id}: {high} -> {low}, cost {}",
                child.time_generated,
                child.cost
            );
        }
        self.stats.runtime_generate_child += generate_start.elapsed();

        replanned.then_some(child)
    }

    /// Replans `agent`, then every agent below it whose path now collides with one above it.
    fn replan(
        &mut self,
        node: &mut SearchNode,
        agent: usize,
        paths: &mut PathSet,
        config: &Config,
    ) -> bool {
        let order = node.priorities.topological_from(agent);
        trace!("replanning order: {order:?}");

        for current in order {
            let invalid = current == agent
                || node
                    .priorities
                    .higher(current)
                    .iter()
                    .any(|&high| is_collide(&paths[current], &paths[high]));
            if !invalid {
                continue;
            }

            let others = paths.iter().enumerate().map(|(other, path)| (other, &**path));
            let Some(path) = self.plan(current, &node.priorities, others, config) else {
                if current == agent {
                    self.stats.agent_itself_failed += 1;
                } else {
                    self.stats.lower_priority_agent_failed += 1;
                }
                debug!("agent {current} has no path below its higher-priority agents");
                return false;
            };

            node.cost = node.cost + path.len() - paths[current].len();
            node.makespan = node.makespan.max(path.len() - 1);
            let path = Rc::new(path);
            paths[current] = Rc::clone(&path);
            node.new_paths.push((current, path));
        }

        true
    }

    fn finish(
        &mut self,
        tree: &SearchTree,
        id: usize,
        paths: &PathSet,
    ) -> Result<Solution, SolveError> {
        let node = tree.get(id);

        for a1 in 0..paths.len() {
            for a2 in (a1 + 1)..paths.len() {
                let Some(conflict) =
                    find_earliest_conflict(a1, &paths[a1], a2, &paths[a2], 0, usize::MAX)
                else {
                    continue;
                };
                let relation = if node.priorities.is_related(a1, a2) {
                    "priority-linked"
                } else {
                    "unordered"
                };
                error!("{relation} agents collide in the final solution: {conflict:?}");
                return Err(SolveError::InvariantViolation(format!(
                    "{relation} agents {a1} and {a2} collide in the final solution: {conflict:?}"
                )));
            }
        }

        let cost = sum_of_costs(paths);
        if cost != node.cost {
            return Err(SolveError::InvariantViolation(format!(
                "node {id} records cost {} but its paths cost {cost}",
                node.cost
            )));
        }

        self.stats.solution_cost = Some(cost);
        self.stats.max_meta_agent_size = node.priorities.max_meta_agent_size();
        self.branch_trace = tree
            .branch(id)
            .into_iter()
            .map(|node_id| {
                let node = tree.get(node_id);
                BranchStep {
                    time_generated: node.time_generated,
                    time_expanded: node.time_expanded,
                    cost: node.cost,
                    conflict: node.conflict.clone(),
                    priorities: node.priorities.clone(),
                }
            })
            .collect();
        if tracing::enabled!(tracing::Level::DEBUG) {
            for step in &self.branch_trace {
                debug!(
                    "branch: generated {}, expanded {:?}, cost {}, max meta-agent {}, conflict {:?}",
                    step.time_generated,
                    step.time_expanded,
                    step.cost,
                    step.max_meta_agent_size(),
                    step.conflict
                );
            }
        }

        info!(
            "solution found at depth {}: cost {cost}, {} of {} nodes expanded",
            node.depth,
            self.stats.high_level_expanded,
            tree.len()
        );
        Ok(Solution {
            paths: paths.iter().map(|path| Path::clone(path)).collect(),
            cost,
        })
    }
}

impl Solver for PBS {
    fn solve(&mut self, config: &Config) -> Result<Solution, SolveError> {
        info!(
            "solve {} agents: conflict selection {:?}, sub-optimal factor {}, fixed priority {}",
            self.agents.len(),
            config.conflict_selection,
            config.sub_optimal,
            config.fixed_priority
        );

        let start = Instant::now();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let result = self.search(config, &mut rng, start);
        self.stats.runtime = start.elapsed();
        self.stats.print();
        result
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

fn extend_frontier(frontier: &VecDeque<usize>, agents: [usize; 2]) -> VecDeque<usize> {
    let mut frontier = frontier.clone();
    for agent in agents {
        if !frontier.contains(&agent) {
            frontier.push_back(agent);
        }
    }
    frontier
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::ConflictSelection;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .try_init();
    }

    fn agents(routes: &[((usize, usize), (usize, usize))]) -> Vec<Agent> {
        routes
            .iter()
            .enumerate()
            .map(|(id, &(start, goal))| Agent { id, start, goal })
            .collect()
    }

    #[test]
    fn test_disjoint_agents_need_no_expansion() {
        init_tracing();
        let map = Map::from_rows(&["...", "...", "..."]);
        let agents = agents(&[((0, 0), (0, 2)), ((2, 0), (2, 2))]);
        let mut solver = PBS::new(agents.clone(), &map);

        let solution = solver.solve(&Config::default()).unwrap();
        assert_eq!(solution.cost, 4);
        assert!(solution.verify(&map, &agents));
        assert_eq!(solver.stats().high_level_expanded, 0);
        assert_eq!(solver.branch_trace().len(), 1);
    }

    #[test]
    fn test_swap_with_room_to_dodge() {
        init_tracing();
        let map = Map::from_rows(&["...", "..."]);
        let agents = agents(&[((0, 0), (0, 2)), ((0, 2), (0, 0))]);
        let mut solver = PBS::new(agents.clone(), &map);

        let solution = solver.solve(&Config::default()).unwrap();
        assert_eq!(solution.cost, 6);
        assert!(solution.verify(&map, &agents));

        let stats = solver.stats();
        assert_eq!(stats.root_cost, 4);
        assert_eq!(stats.high_level_expanded, 1);
        assert_eq!(stats.num_2_child, 1);
        assert_eq!(stats.max_meta_agent_size, 2);
        assert_eq!(stats.num_external_conflicts, 1);

        let trace = solver.branch_trace();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].cost, 4);
        assert_eq!(trace[1].cost, 6);
        assert_eq!(trace[1].max_meta_agent_size(), 2);
        assert_eq!(trace[0].max_meta_agent_size(), 1);

        // The root keeps the conflict it was branched on after being closed.
        let conflict = trace[0].conflict.as_ref().unwrap();
        assert_eq!((conflict.agent_1, conflict.agent_2), (0, 1));
        assert_eq!(trace[0].time_expanded, Some(1));
        assert_eq!(trace[1].conflict, None);
        assert_eq!(trace[1].time_expanded, None);
    }

    #[test]
    fn test_swap_in_corridor_is_exhausted() {
        let map = Map::from_rows(&["..."]);
        let agents = agents(&[((0, 0), (0, 2)), ((0, 2), (0, 0))]);
        let mut solver = PBS::new(agents, &map);

        let result = solver.solve(&Config::default());
        assert!(matches!(result, Err(SolveError::Exhausted)));
        assert_eq!(solver.stats().num_0_child, 1);
        assert_eq!(solver.stats().agent_itself_failed, 2);
    }

    #[test]
    fn test_unreachable_goal_is_exhausted() {
        let map = Map::from_rows(&[".@."]);
        let agents = agents(&[((0, 0), (0, 2))]);
        let mut solver = PBS::new(agents, &map);
        assert!(matches!(
            solver.solve(&Config::default()),
            Err(SolveError::Exhausted)
        ));
    }

    #[test]
    fn test_node_limit() {
        let map = Map::from_rows(&["...", "..."]);
        let agents = agents(&[((0, 0), (0, 2)), ((0, 2), (0, 0))]);
        let mut solver = PBS::new(agents, &map);
        let config = Config {
            node_limit: 0,
            ..Config::default()
        };

        match solver.solve(&config) {
            Err(SolveError::BudgetExceeded { reason, stats }) => {
                assert_eq!(reason, BudgetReason::NodeLimit);
                assert_eq!(stats.root_cost, 4);
                assert_eq!(stats.solution_cost, None);
            }
            other => panic!("expected node limit, got {other:?}"),
        }
    }

    #[test]
    fn test_node_limit_counts_expansions_only() {
        // A conflict-free root needs no expansion at all.
        let map = Map::from_rows(&["...", "...", "..."]);
        let disjoint = agents(&[((0, 0), (0, 2)), ((2, 0), (2, 2))]);
        let mut solver = PBS::new(disjoint, &map);
        let config = Config {
            node_limit: 0,
            ..Config::default()
        };
        assert_eq!(solver.solve(&config).unwrap().cost, 4);
        assert_eq!(solver.stats().high_level_expanded, 0);

        // The swap is solved by exactly one expansion.
        let map = Map::from_rows(&["...", "..."]);
        let swap = agents(&[((0, 0), (0, 2)), ((0, 2), (0, 0))]);
        let mut solver = PBS::new(swap, &map);
        let config = Config {
            node_limit: 1,
            ..Config::default()
        };
        assert_eq!(solver.solve(&config).unwrap().cost, 6);
        assert_eq!(solver.stats().high_level_expanded, 1);
    }

    #[test]
    fn test_fixed_priority_root_is_a_solution() {
        init_tracing();
        let map = Map::from_rows(&["...", "..."]);
        let agents = agents(&[((0, 0), (0, 2)), ((0, 2), (0, 0))]);
        let mut solver = PBS::new(agents.clone(), &map);
        let config = Config {
            fixed_priority: true,
            ..Config::default()
        };

        let solution = solver.solve(&config).unwrap();
        assert_eq!(solution.cost, 6);
        assert!(solution.verify(&map, &agents));
        assert_eq!(solver.stats().high_level_expanded, 0);
        assert_eq!(solver.stats().fixed_priority_restarts, 0);
    }

    #[test]
    fn test_fixed_priority_times_out_when_every_order_fails() {
        let map = Map::from_rows(&["..."]);
        let agents = agents(&[((0, 0), (0, 2)), ((0, 2), (0, 0))]);
        let mut solver = PBS::new(agents, &map);
        let config = Config {
            fixed_priority: true,
            time_limit_secs: 1,
            ..Config::default()
        };

        match solver.solve(&config) {
            Err(SolveError::BudgetExceeded { reason, stats }) => {
                assert_eq!(reason, BudgetReason::TimeLimit);
                assert!(stats.fixed_priority_restarts > 0);
            }
            other => panic!("expected time limit, got {other:?}"),
        }
    }

    #[test]
    fn test_every_policy_solves_the_swap() {
        let map = Map::from_rows(&["....", "....", "...."]);
        let agents = agents(&[
            ((1, 0), (1, 3)),
            ((1, 3), (1, 0)),
            ((0, 1), (2, 1)),
        ]);

        for policy in [
            ConflictSelection::Exhaustive,
            ConflictSelection::Random,
            ConflictSelection::EarliestTime,
            ConflictSelection::MinMetaAgent,
            ConflictSelection::MaxMetaAgent,
            ConflictSelection::FrontierBfs,
            ConflictSelection::FrontierDfs,
            ConflictSelection::MinConstraints,
            ConflictSelection::MaxConstraints,
        ] {
            let mut solver = PBS::new(agents.clone(), &map);
            let config = Config {
                conflict_selection: policy,
                ..Config::default()
            };
            let solution = solver.solve(&config).unwrap();
            assert!(solution.verify(&map, &agents), "{policy:?}");
            assert_eq!(solver.stats().solution_cost, Some(solution.cost));
        }
    }

    #[test]
    fn test_extend_frontier_skips_present_agents() {
        let frontier = VecDeque::from([3, 1]);
        assert_eq!(extend_frontier(&frontier, [1, 4]), VecDeque::from([3, 1, 4]));
    }
}
