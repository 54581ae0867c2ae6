use super::AvoidanceTables;
use crate::common::{Agent, LowLevelNode, NodeKey, Path};
use crate::map::{Heuristic, Map, ACTIONS, WAIT_ACTION};
use crate::stat::Stats;

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, instrument, trace};

/// Bounded-suboptimal search for one agent.
///
/// Moves colliding with `tables.higher` are forbidden. Among the nodes whose f cost is within
/// `subopt_factor` of the best open f cost, the search expands the one with the fewest
/// collisions against `tables.undecided`, then against `tables.lower`. Returns `None` when
/// the agent cannot reach its goal around the higher-priority agents.
#[instrument(skip_all, name = "focal_search", fields(agent = agent.id, subopt_factor = subopt_factor, start = format!("{:?}", agent.start), goal = format!("{:?}", agent.goal)), level = "debug")]
pub fn focal_search(
    map: &Map,
    agent: &Agent,
    heuristic: &Heuristic,
    subopt_factor: f64,
    tables: &AvoidanceTables<'_>,
    stats: &mut Stats,
) -> Option<Path> {
    let start_h_cost = heuristic[agent.start.0][agent.start.1];
    if start_h_cost == usize::MAX {
        debug!("goal is unreachable from start");
        return None;
    }

    // Stopping at the goal before this time step gets us run over by a higher-priority agent.
    let last_goal_constraint = tables.higher.latest_vertex_entry(agent.goal);
    // Hard obstacles no longer change after this time step, so waiting stops paying off and
    // the time step is frozen to keep the state space finite.
    let constraint_limit_time_step = tables.higher.latest_entry().unwrap_or(0);
    debug!(
        "last goal constraint: {last_goal_constraint:?}, limit time step: {constraint_limit_time_step}"
    );

    let mut nodes: HashMap<NodeKey, LowLevelNode> = HashMap::new();
    let mut open_list = BTreeSet::new();
    let mut focal_list = BTreeSet::new();

    let start = LowLevelNode {
        position: agent.start,
        g_cost: 0,
        h_cost: start_h_cost,
        time_step: 0,
        conflicts: 0,
        conflicts_lower: 0,
        parent: None,
        in_open: true,
    };
    open_list.insert(start.open_key());
    focal_list.insert(start.focal_key());
    nodes.insert(start.key(), start);
    stats.low_level_generated += 1;

    let mut f_min = start_h_cost;
    let mut lower_bound = subopt_factor * f_min as f64;

    while let Some(focal_key) = focal_list.pop_first() {
        let Some(node) = nodes.get_mut(&focal_key.node_key()) else {
            continue;
        };
        node.in_open = false;
        let current = *node;
        assert!(open_list.remove(&current.open_key()));

        trace!("expand node: {current:?}");
        stats.low_level_expanded += 1;

        if current.position == agent.goal
            && last_goal_constraint.is_none_or(|time_step| current.g_cost >= time_step)
        {
            debug!(
                "find solution with cost {}, conflicts ({}, {})",
                current.g_cost, current.conflicts, current.conflicts_lower
            );
            return Some(construct_path(&nodes, current.key()));
        }

        let exceed_constraints_limit_time_step = current.time_step >= constraint_limit_time_step;
        let tentative_g_cost = current.g_cost + 1;
        let tentative_time_step = if exceed_constraints_limit_time_step {
            current.time_step
        } else {
            current.time_step + 1
        };

        for action in 0..ACTIONS.len() {
            if exceed_constraints_limit_time_step && action == WAIT_ACTION {
                continue;
            }
            let Some(neighbor) = map.apply_action(current.position, action) else {
                continue;
            };
            let h_cost = heuristic[neighbor.0][neighbor.1];
            if h_cost == usize::MAX {
                continue;
            }

            // Higher-priority agents are obstacles.
            if tables
                .higher
                .num_conflicts_for_step(current.position, neighbor, tentative_g_cost)
                > 0
            {
                continue;
            }

            let conflicts = current.conflicts
                + tables
                    .undecided
                    .num_conflicts_for_step(current.position, neighbor, tentative_g_cost);
            let conflicts_lower = current.conflicts_lower
                + tables
                    .lower
                    .num_conflicts_for_step(current.position, neighbor, tentative_g_cost);
            let f_cost = tentative_g_cost + h_cost;

            match nodes.entry((neighbor, tentative_time_step)) {
                Entry::Vacant(entry) => {
                    let next = LowLevelNode {
                        position: neighbor,
                        g_cost: tentative_g_cost,
                        h_cost,
                        time_step: tentative_time_step,
                        conflicts,
                        conflicts_lower,
                        parent: Some(current.key()),
                        in_open: true,
                    };
                    open_list.insert(next.open_key());
                    if f_cost as f64 <= lower_bound {
                        focal_list.insert(next.focal_key());
                    }
                    entry.insert(next);
                    stats.low_level_generated += 1;
                }
                Entry::Occupied(mut entry) => {
                    let existing = entry.get_mut();
                    // Closed nodes are never reopened.
                    if !existing.in_open
                        || !existing.is_improved_by(f_cost, conflicts, conflicts_lower)
                    {
                        continue;
                    }

                    open_list.remove(&existing.open_key());
                    focal_list.remove(&existing.focal_key());
                    existing.g_cost = tentative_g_cost;
                    existing.h_cost = h_cost;
                    existing.conflicts = conflicts;
                    existing.conflicts_lower = conflicts_lower;
                    existing.parent = Some(current.key());
                    open_list.insert(existing.open_key());
                    if f_cost as f64 <= lower_bound {
                        focal_list.insert(existing.focal_key());
                    }
                }
            }
        }

        let Some(open_head) = open_list.first() else {
            break;
        };

        // Widen focal once the best open f cost has increased.
        if open_head.f_cost > f_min {
            let new_f_min = open_head.f_cost;
            let new_lower_bound = subopt_factor * new_f_min as f64;
            for open_key in &open_list {
                let f_cost = open_key.f_cost as f64;
                if f_cost > lower_bound && f_cost <= new_lower_bound {
                    focal_list.insert(nodes[&(open_key.position, open_key.time_step)].focal_key());
                }
            }
            f_min = new_f_min;
            lower_bound = new_lower_bound;
        }
    }

    debug!("no path around higher-priority agents");
    None
}

fn construct_path(nodes: &HashMap<NodeKey, LowLevelNode>, goal: NodeKey) -> Path {
    let mut path = Vec::new();
    let mut current = Some(goal);
    while let Some(key) = current {
        let node = &nodes[&key];
        path.push(node.position);
        current = node.parent;
    }
    path.reverse();
    path
}
