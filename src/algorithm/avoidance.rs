use crate::common::{Path, PriorityGraph};
use crate::map::{action_between, Map, ACTIONS};

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Usage {
    vertex: usize,
    edges: [usize; ACTIONS.len()], // indexed by the action that entered the cell
}

impl Usage {
    fn is_empty(&self) -> bool {
        self.vertex == 0 && self.edges.iter().all(|&count| count == 0)
    }
}

/// Spatiotemporal occupancy counts of a set of paths.
///
/// Every location keeps a time-sorted sparse list of usage records. A move `from -> to`
/// at time `t` is recorded at `to` under the action that produced it. Agents resting at
/// their goal are kept apart as "occupied from `t` onward" markers.
#[derive(Debug, Clone)]
pub struct ConflictAvoidanceTable<'m> {
    map: &'m Map,
    timelines: Vec<Vec<(usize, Usage)>>,
    at_goal: HashMap<usize, Vec<usize>>,
}

impl<'m> ConflictAvoidanceTable<'m> {
    pub fn new(map: &'m Map) -> Self {
        ConflictAvoidanceTable {
            map,
            timelines: vec![Vec::new(); map.size()],
            at_goal: HashMap::new(),
        }
    }

    fn index(&self, position: (usize, usize)) -> usize {
        self.map.linearize(position)
    }

    fn usage(&self, position: (usize, usize), time_step: usize) -> Option<&Usage> {
        let timeline = &self.timelines[self.index(position)];
        timeline
            .binary_search_by_key(&time_step, |(time, _)| *time)
            .ok()
            .map(|slot| &timeline[slot].1)
    }

    fn usage_mut(&mut self, position: (usize, usize), time_step: usize) -> &mut Usage {
        let index = self.index(position);
        let timeline = &mut self.timelines[index];
        let slot = match timeline.binary_search_by_key(&time_step, |(time, _)| *time) {
            Ok(slot) => slot,
            Err(slot) => {
                timeline.insert(slot, (time_step, Usage::default()));
                slot
            }
        };
        &mut timeline[slot].1
    }

    pub fn add_action(&mut self, time_step: usize, from: (usize, usize), to: (usize, usize)) {
        let action = action_between(from, to)
            .unwrap_or_else(|| panic!("{from:?} -> {to:?} is not a single grid move"));
        let usage = self.usage_mut(to, time_step);
        usage.vertex += 1;
        usage.edges[action] += 1;
    }

    pub fn remove_action(&mut self, time_step: usize, from: (usize, usize), to: (usize, usize)) {
        let action = action_between(from, to)
            .unwrap_or_else(|| panic!("{from:?} -> {to:?} is not a single grid move"));
        let index = self.index(to);
        let timeline = &mut self.timelines[index];
        let Ok(slot) = timeline.binary_search_by_key(&time_step, |(time, _)| *time) else {
            panic!("no recorded action into {to:?} at time {time_step}");
        };

        let usage = &mut timeline[slot].1;
        assert!(
            usage.vertex > 0 && usage.edges[action] > 0,
            "no recorded action {from:?} -> {to:?} at time {time_step}"
        );
        usage.vertex -= 1;
        usage.edges[action] -= 1;
        if usage.is_empty() {
            timeline.remove(slot);
        }
    }

    /// Marks `position` as occupied from `time_step` on.
    pub fn add_wait_at_goal(&mut self, time_step: usize, position: (usize, usize)) {
        let index = self.index(position);
        self.at_goal.entry(index).or_default().push(time_step);
    }

    pub fn remove_wait_at_goal(&mut self, time_step: usize, position: (usize, usize)) {
        let index = self.index(position);
        let times = self
            .at_goal
            .get_mut(&index)
            .unwrap_or_else(|| panic!("no agent parked at {position:?}"));
        let slot = times
            .iter()
            .position(|&time| time == time_step)
            .unwrap_or_else(|| panic!("no agent parked at {position:?} from time {time_step}"));
        times.swap_remove(slot);
        if times.is_empty() {
            self.at_goal.remove(&index);
        }
    }

    /// Number of recorded agents a move `from -> to` arriving at `time_step` would collide with.
    pub fn num_conflicts_for_step(
        &self,
        from: (usize, usize),
        to: (usize, usize),
        time_step: usize,
    ) -> usize {
        let mut conflicts = 0;

        if let Some(usage) = self.usage(to, time_step) {
            conflicts += usage.vertex;
        }

        // Swap: somebody moved to -> from during the same step.
        if from != to {
            if let (Some(usage), Some(action)) =
                (self.usage(from, time_step), action_between(to, from))
            {
                conflicts += usage.edges[action];
            }
        }

        if let Some(times) = self.at_goal.get(&self.index(to)) {
            conflicts += times.iter().filter(|&&time| time <= time_step).count();
        }

        conflicts
    }

    /// Latest time step at which `position` is entered or starts being permanently occupied.
    pub fn latest_vertex_entry(&self, position: (usize, usize)) -> Option<usize> {
        let index = self.index(position);
        let moved = self.timelines[index]
            .iter()
            .rev()
            .find(|(_, usage)| usage.vertex > 0)
            .map(|(time, _)| *time);
        let parked = self
            .at_goal
            .get(&index)
            .and_then(|times| times.iter().max().copied());
        moved.max(parked)
    }

    /// Latest time step with any recorded usage anywhere.
    pub fn latest_entry(&self) -> Option<usize> {
        let moved = self
            .timelines
            .iter()
            .filter_map(|timeline| timeline.last().map(|(time, _)| *time))
            .max();
        let parked = self.at_goal.values().flatten().max().copied();
        moved.max(parked)
    }

    pub fn is_empty(&self) -> bool {
        self.at_goal.is_empty() && self.timelines.iter().all(Vec::is_empty)
    }

    /// Records every step of `path`, then parks the agent at its last cell.
    ///
    /// Trailing waits at the last cell are folded into the parking marker, so a path padded
    /// with waits and its unpadded form produce the same table.
    pub fn add_path(&mut self, path: &[(usize, usize)]) {
        let Some(arrival) = Self::arrival(path) else {
            return;
        };
        for time_step in 1..=arrival {
            self.add_action(time_step, path[time_step - 1], path[time_step]);
        }
        self.add_wait_at_goal(arrival + 1, path[arrival]);
    }

    pub fn remove_path(&mut self, path: &[(usize, usize)]) {
        let Some(arrival) = Self::arrival(path) else {
            return;
        };
        for time_step in 1..=arrival {
            self.remove_action(time_step, path[time_step - 1], path[time_step]);
        }
        self.remove_wait_at_goal(arrival + 1, path[arrival]);
    }

    // First time step from which the path only waits at its last cell.
    fn arrival(path: &[(usize, usize)]) -> Option<usize> {
        let last = *path.last()?;
        let mut arrival = path.len() - 1;
        while arrival > 0 && path[arrival - 1] == last {
            arrival -= 1;
        }
        Some(arrival)
    }
}

/// The other agents' paths seen from one agent, split by priority.
#[derive(Debug, Clone)]
pub struct AvoidanceTables<'m> {
    pub higher: ConflictAvoidanceTable<'m>,    // hard obstacles
    pub undecided: ConflictAvoidanceTable<'m>, // soft, primary tie-break
    pub lower: ConflictAvoidanceTable<'m>,     // soft, secondary tie-break
}

impl<'m> AvoidanceTables<'m> {
    pub fn empty(map: &'m Map) -> Self {
        AvoidanceTables {
            higher: ConflictAvoidanceTable::new(map),
            undecided: ConflictAvoidanceTable::new(map),
            lower: ConflictAvoidanceTable::new(map),
        }
    }

    /// Sorts every other agent's path into the table matching its priority relative to `agent`.
    pub fn build<'a>(
        map: &'m Map,
        agent: usize,
        priorities: &PriorityGraph,
        paths: impl IntoIterator<Item = (usize, &'a Path)>,
    ) -> Self {
        let mut tables = AvoidanceTables::empty(map);
        for (other, path) in paths {
            if other == agent {
                continue;
            }
            if priorities.precedes(other, agent) {
                tables.higher.add_path(path);
            } else if priorities.precedes(agent, other) {
                tables.lower.add_path(path);
            } else {
                tables.undecided.add_path(path);
            }
        }
        tables
    }
}
