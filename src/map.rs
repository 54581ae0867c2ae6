use anyhow::{anyhow, bail, Context};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs;
use std::str::FromStr;

/// Up, down, left, right, wait.
pub const ACTIONS: [(isize, isize); 5] = [(-1, 0), (1, 0), (0, -1), (0, 1), (0, 0)];
pub const WAIT_ACTION: usize = 4;

/// Exact distance-to-goal table, indexed `[row][col]`. Unreachable cells hold `usize::MAX`.
pub type Heuristic = Vec<Vec<usize>>;

#[derive(Debug, Clone)]
pub struct Tile {
    passable: bool,
    pub neighbors: Vec<(usize, usize)>, // Stores coordinates of accessible neighbors, wait excluded
}

impl Tile {
    pub fn is_passable(&self) -> bool {
        self.passable
    }
}

#[derive(Debug, Clone)]
pub struct Map {
    pub height: usize,
    pub width: usize,
    pub grid: Vec<Vec<Tile>>,
}

impl FromStr for Map {
    type Err = anyhow::Error;

    /// Parses the MovingAI map format: `type`, `height`, `width`, `map`, then the rows.
    fn from_str(content: &str) -> anyhow::Result<Self> {
        let mut lines = content.lines();

        let _type = lines.next().ok_or_else(|| anyhow!("missing map type line"))?;
        let height = parse_header(lines.next(), "height")?;
        let width = parse_header(lines.next(), "width")?;
        let _map = lines.next().ok_or_else(|| anyhow!("missing map marker line"))?;

        let rows: Vec<&str> = lines.take(height).collect();
        if rows.len() != height {
            bail!("expected {height} map rows, found {}", rows.len());
        }
        if let Some(row) = rows.iter().find(|row| row.chars().count() < width) {
            bail!("map row {row:?} is shorter than width {width}");
        }

        Ok(Map::from_rows(&rows))
    }
}

fn parse_header(line: Option<&str>, key: &str) -> anyhow::Result<usize> {
    let line = line.ok_or_else(|| anyhow!("missing {key} line"))?;
    line.split_whitespace()
        .last()
        .ok_or_else(|| anyhow!("empty {key} line"))?
        .parse::<usize>()
        .with_context(|| format!("invalid {key} value in {line:?}"))
}

impl Map {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read map file {path}"))?;
        content
            .parse()
            .with_context(|| format!("failed to parse map file {path}"))
    }

    /// Builds a map from raw grid rows. `.`, `G` and `S` are passable, anything else is blocked.
    pub fn from_rows<S: AsRef<str>>(rows: &[S]) -> Self {
        let height = rows.len();
        let width = rows
            .iter()
            .map(|row| row.as_ref().chars().count())
            .max()
            .unwrap_or(0);

        let grid = rows
            .iter()
            .map(|row| {
                let mut tiles: Vec<Tile> = row
                    .as_ref()
                    .chars()
                    .map(|ch| Tile {
                        passable: matches!(ch, '.' | 'G' | 'S'),
                        neighbors: Vec::new(),
                    })
                    .collect();
                tiles.resize(
                    width,
                    Tile {
                        passable: false,
                        neighbors: Vec::new(),
                    },
                );
                tiles
            })
            .collect();

        let mut map = Map {
            height,
            width,
            grid,
        };
        map.initialize_neighbors();
        map
    }

    fn initialize_neighbors(&mut self) {
        for x in 0..self.height {
            for y in 0..self.width {
                if self.grid[x][y].passable {
                    self.grid[x][y].neighbors = self.get_neighbors((x, y), false);
                }
            }
        }
    }

    /// Applies one of the five actions, returning the destination if it is inside the grid and passable.
    pub fn apply_action(&self, position: (usize, usize), action: usize) -> Option<(usize, usize)> {
        let (dx, dy) = ACTIONS[action];
        let new_x = position.0.checked_add_signed(dx)?;
        let new_y = position.1.checked_add_signed(dy)?;
        (new_x < self.height && new_y < self.width && self.grid[new_x][new_y].passable)
            .then_some((new_x, new_y))
    }

    pub fn get_neighbors(&self, position: (usize, usize), allow_wait: bool) -> Vec<(usize, usize)> {
        (0..ACTIONS.len())
            .filter(|&action| allow_wait || action != WAIT_ACTION)
            .filter_map(|action| self.apply_action(position, action))
            .collect()
    }

    pub fn is_passable(&self, x: usize, y: usize) -> bool {
        x < self.height && y < self.width && self.grid[x][y].is_passable()
    }

    pub fn size(&self) -> usize {
        self.height * self.width
    }

    /// Dense index of a cell, used by the occupancy tables.
    pub fn linearize(&self, position: (usize, usize)) -> usize {
        position.0 * self.width + position.1
    }

    pub fn heuristic_dji(&self, goal: (usize, usize)) -> Heuristic {
        let mut heuristic = vec![vec![usize::MAX; self.width]; self.height];
        let mut heap = BinaryHeap::new();

        heuristic[goal.0][goal.1] = 0;
        heap.push((Reverse(0), goal));

        while let Some((Reverse(cost), (x, y))) = heap.pop() {
            if cost > heuristic[x][y] {
                continue;
            }

            for &(new_x, new_y) in &self.grid[x][y].neighbors {
                let next_cost = cost + 1;
                if next_cost < heuristic[new_x][new_y] {
                    heap.push((Reverse(next_cost), (new_x, new_y)));
                    heuristic[new_x][new_y] = next_cost;
                }
            }
        }

        heuristic
    }
}

/// Index into [`ACTIONS`] of the move `from -> to`, if the two cells are adjacent or equal.
pub fn action_between(from: (usize, usize), to: (usize, usize)) -> Option<usize> {
    let dx = to.0 as isize - from.0 as isize;
    let dy = to.1 as isize - from.1 as isize;
    ACTIONS.iter().position(|&offset| offset == (dx, dy))
}
