use std::cmp::Reverse;

/// Identity of a low-level search state: cell plus (possibly frozen) time step.
pub(crate) type NodeKey = ((usize, usize), usize);

#[derive(Clone, Copy, Debug)]
pub(crate) struct LowLevelNode {
    pub(crate) position: (usize, usize),
    pub(crate) g_cost: usize,
    pub(crate) h_cost: usize,
    pub(crate) time_step: usize, // equals g_cost until the avoidance horizon, frozen after
    pub(crate) conflicts: usize, // soft hits against agents with undecided priority
    pub(crate) conflicts_lower: usize, // soft hits against lower-priority agents
    pub(crate) parent: Option<NodeKey>,
    pub(crate) in_open: bool,
}

impl LowLevelNode {
    pub(crate) fn f_cost(&self) -> usize {
        self.g_cost + self.h_cost
    }

    pub(crate) fn key(&self) -> NodeKey {
        (self.position, self.time_step)
    }

    pub(crate) fn open_key(&self) -> OpenKey {
        OpenKey {
            f_cost: self.f_cost(),
            g_cost: Reverse(self.g_cost),
            position: self.position,
            time_step: self.time_step,
        }
    }

    pub(crate) fn focal_key(&self) -> FocalKey {
        FocalKey {
            conflicts: self.conflicts,
            conflicts_lower: self.conflicts_lower,
            f_cost: self.f_cost(),
            g_cost: Reverse(self.g_cost),
            position: self.position,
            time_step: self.time_step,
        }
    }

    /// Whether reaching this state through a new parent with the given costs is an improvement.
    pub(crate) fn is_improved_by(&self, f_cost: usize, conflicts: usize, conflicts_lower: usize) -> bool {
        (f_cost, conflicts, conflicts_lower) < (self.f_cost(), self.conflicts, self.conflicts_lower)
    }
}

// Open list order: lowest f first, deeper g breaks ties.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct OpenKey {
    pub(crate) f_cost: usize,
    pub(crate) g_cost: Reverse<usize>,
    pub(crate) position: (usize, usize),
    pub(crate) time_step: usize,
}

// Focal list order: fewest undecided conflicts, then fewest lower conflicts, then open order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct FocalKey {
    pub(crate) conflicts: usize,
    pub(crate) conflicts_lower: usize,
    pub(crate) f_cost: usize,
    pub(crate) g_cost: Reverse<usize>,
    pub(crate) position: (usize, usize),
    pub(crate) time_step: usize,
}

impl FocalKey {
    pub(crate) fn node_key(&self) -> NodeKey {
        (self.position, self.time_step)
    }
}
