//! Incremental shortest-path search over a [`PlanningGrid`], D*-Lite
//! (Koenig & Likhachev). The search is goal-rooted: `rhs(goal) = 0` and
//! the open queue is seeded at the goal, so a single `plan()` call walks
//! the standard `compute_shortest_path` loop to quiescence and then
//! extracts a path by greedy descent from `start`.
//!
//! `km` lives on the `Planner` instance rather than being recomputed per
//! call. This system always hands the planner a fresh grid, so `km`
//! never actually needs to move — the field exists so a future caller
//! that does reuse one `Planner` across incremental edge-cost changes
//! gets the right behaviour for free.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use rovercore_types::{Cell, CellLabel, Plan, PlanningGrid};

/// Fixed neighbour iteration order, `(+x, -x, +y, -y)`, so tied-cost
/// paths come out deterministic.
const NEIGHBOUR_OFFSETS: [(i64, i64); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Key(f64, f64);

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .partial_cmp(&other.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.1.partial_cmp(&other.1).unwrap_or(Ordering::Equal))
    }
}

/// Reversed so `BinaryHeap` (a max-heap) pops the lexicographically
/// smallest key first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    key: Key,
    cell: Cell,
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key)
    }
}

/// Incremental shortest-path planner over a 4-connected coarse grid.
/// Unit edge cost; a `BLOCKED` cell carries infinite node cost, so no
/// path may step into one.
pub struct Planner {
    km: f64,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    pub fn new() -> Self {
        Self { km: 0.0 }
    }

    /// Plan a 4-connected path from `start` to `goal` on `grid`. Returns
    /// an empty plan if either endpoint is out of bounds, if no path
    /// exists, or if the path would have length <= 1 (nothing to
    /// follow — the trivial-path convention).
    pub fn plan(&mut self, grid: &PlanningGrid, start: Cell, goal: Cell) -> Plan {
        if !in_bounds(grid, start) || !in_bounds(grid, goal) {
            return Plan::default();
        }
        if start == goal {
            return Plan::default();
        }

        let mut search = Search::new(grid, start, goal, self.km);
        search.compute_shortest_path();
        let cells = search.extract_path();
        self.km = search.km;

        let plan = Plan { cells };
        if plan.is_empty() { Plan::default() } else { plan }
    }
}

fn in_bounds(grid: &PlanningGrid, cell: Cell) -> bool {
    grid.in_bounds(cell.0 as i64, cell.1 as i64)
}

fn node_cost(grid: &PlanningGrid, cell: Cell) -> f64 {
    match grid.label(cell.0, cell.1) {
        CellLabel::Blocked => f64::INFINITY,
        CellLabel::Free | CellLabel::Unknown => 1.0,
    }
}

fn neighbours(grid: &PlanningGrid, cell: Cell) -> Vec<Cell> {
    NEIGHBOUR_OFFSETS
        .iter()
        .filter_map(|(dx, dy)| {
            let nx = cell.0 as i64 + dx;
            let ny = cell.1 as i64 + dy;
            if grid.in_bounds(nx, ny) {
                Some((nx as u32, ny as u32))
            } else {
                None
            }
        })
        .collect()
}

fn manhattan(a: Cell, b: Cell) -> f64 {
    (a.0 as i64 - b.0 as i64).unsigned_abs() as f64 + (a.1 as i64 - b.1 as i64).unsigned_abs() as f64
}

struct Search<'a> {
    grid: &'a PlanningGrid,
    start: Cell,
    goal: Cell,
    km: f64,
    g: HashMap<Cell, f64>,
    rhs: HashMap<Cell, f64>,
    open: BinaryHeap<QueueEntry>,
    in_open: HashMap<Cell, Key>,
}

impl<'a> Search<'a> {
    fn new(grid: &'a PlanningGrid, start: Cell, goal: Cell, km: f64) -> Self {
        let mut s = Self {
            grid,
            start,
            goal,
            km,
            g: HashMap::new(),
            rhs: HashMap::new(),
            open: BinaryHeap::new(),
            in_open: HashMap::new(),
        };
        s.rhs.insert(goal, 0.0);
        let key = s.calculate_key(goal);
        s.push(goal, key);
        s
    }

    fn g_of(&self, c: Cell) -> f64 {
        *self.g.get(&c).unwrap_or(&f64::INFINITY)
    }

    fn rhs_of(&self, c: Cell) -> f64 {
        *self.rhs.get(&c).unwrap_or(&f64::INFINITY)
    }

    fn calculate_key(&self, c: Cell) -> Key {
        let m = self.g_of(c).min(self.rhs_of(c));
        Key(m + manhattan(self.start, c) + self.km, m)
    }

    fn push(&mut self, c: Cell, key: Key) {
        self.in_open.insert(c, key);
        self.open.push(QueueEntry { key, cell: c });
    }

    /// Peek the lexicographically-smallest live key, discarding stale
    /// entries along the way (a cell pushed more than once only keeps
    /// its most recent key live in `in_open`; older duplicates are
    /// garbage and dropped permanently here rather than re-queued).
    fn top_key(&mut self) -> Option<Key> {
        while let Some(entry) = self.open.peek().copied() {
            if self.in_open.get(&entry.cell) == Some(&entry.key) {
                return Some(entry.key);
            }
            self.open.pop();
        }
        None
    }

    fn pop(&mut self) -> Option<(Key, Cell)> {
        loop {
            let entry = self.open.pop()?;
            if self.in_open.get(&entry.cell) == Some(&entry.key) {
                self.in_open.remove(&entry.cell);
                return Some((entry.key, entry.cell));
            }
            // stale entry from an earlier push of this cell; discard.
        }
    }

    fn update_vertex(&mut self, u: Cell) {
        if u != self.goal {
            let best = neighbours(self.grid, u)
                .into_iter()
                .map(|v| node_cost(self.grid, v) + self.g_of(v))
                .fold(f64::INFINITY, f64::min);
            self.rhs.insert(u, best);
        }
        self.in_open.remove(&u);
        if self.g_of(u) != self.rhs_of(u) {
            let key = self.calculate_key(u);
            self.push(u, key);
        }
    }

    fn compute_shortest_path(&mut self) {
        loop {
            let start_key = self.calculate_key(self.start);
            let keep_going = match self.top_key() {
                Some(top) => top < start_key,
                None => false,
            } || self.rhs_of(self.start) != self.g_of(self.start);
            if !keep_going {
                break;
            }

            let Some((k_old, u)) = self.pop() else { break };
            let k_new = self.calculate_key(u);
            if k_old < k_new {
                self.push(u, k_new);
                continue;
            }
            if self.g_of(u) > self.rhs_of(u) {
                self.g.insert(u, self.rhs_of(u));
                for v in neighbours(self.grid, u) {
                    self.update_vertex(v);
                }
            } else {
                self.g.insert(u, f64::INFINITY);
                self.update_vertex(u);
                for v in neighbours(self.grid, u) {
                    self.update_vertex(v);
                }
            }
        }
    }

    /// Greedy descent from `start`: repeatedly step to the neighbour
    /// minimising `cost(n) + g(n)` until `goal`, or stop if no neighbour
    /// improves on the current cell (a fixed point — no path).
    fn extract_path(&self) -> Vec<Cell> {
        if self.g_of(self.start).is_infinite() {
            return Vec::new();
        }

        let mut path = vec![self.start];
        let mut current = self.start;
        let mut guard = 0usize;
        let limit = (self.grid.side_cells as usize) * (self.grid.side_cells as usize) + 1;

        while current != self.goal {
            guard += 1;
            if guard > limit {
                return Vec::new();
            }
            let next = neighbours(self.grid, current)
                .into_iter()
                .map(|n| (n, node_cost(self.grid, n) + self.g_of(n)))
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
            match next {
                Some((n, cost)) if cost.is_finite() => {
                    current = n;
                    path.push(current);
                }
                _ => return Vec::new(),
            }
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rovercore_types::CellLabel;

    fn uniform_grid(side: u32, label: CellLabel) -> PlanningGrid {
        PlanningGrid {
            side_cells: side,
            cell_px: 1,
            labels: vec![label; (side * side) as usize],
        }
    }

    fn set(grid: &mut PlanningGrid, c: Cell, label: CellLabel) {
        let idx = (c.1 as usize) * (grid.side_cells as usize) + c.0 as usize;
        grid.labels[idx] = label;
    }

    #[test]
    fn same_start_and_goal_is_empty() {
        let grid = uniform_grid(10, CellLabel::Free);
        let mut planner = Planner::new();
        let plan = planner.plan(&grid, (3, 3), (3, 3));
        assert!(plan.is_empty());
    }

    #[test]
    fn out_of_bounds_start_or_goal_is_empty() {
        let grid = uniform_grid(10, CellLabel::Free);
        let mut planner = Planner::new();
        assert!(planner.plan(&grid, (20, 20), (3, 3)).is_empty());
        assert!(planner.plan(&grid, (3, 3), (20, 20)).is_empty());
    }

    #[test]
    fn straight_corridor_follows_the_free_row() {
        // 10x10, row y=5 is FREE, everything else BLOCKED.
        let mut grid = uniform_grid(10, CellLabel::Blocked);
        for x in 0..10 {
            set(&mut grid, (x, 5), CellLabel::Free);
        }
        let mut planner = Planner::new();
        let plan = planner.plan(&grid, (0, 5), (9, 5));
        assert!(!plan.is_empty());
        let expected: Vec<Cell> = (0..10).map(|x| (x, 5)).collect();
        assert_eq!(plan.cells, expected);
    }

    #[test]
    fn single_obstacle_detour_is_shortest_and_avoids_block() {
        let mut grid = uniform_grid(5, CellLabel::Free);
        set(&mut grid, (2, 2), CellLabel::Blocked);
        let mut planner = Planner::new();
        let plan = planner.plan(&grid, (0, 2), (4, 2));
        assert!(!plan.is_empty());
        assert_eq!(plan.cells.first(), Some(&(0, 2)));
        assert_eq!(plan.cells.last(), Some(&(4, 2)));
        // 4 direct edges + a 2-edge detour around (2,2) = 6 edges = 7 cells,
        // matching spec.md §8 scenario 3's own worked example.
        assert_eq!(plan.cells.len(), 7);
        assert!(!plan.cells.contains(&(2, 2)));
        for pair in plan.cells.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let dist = (a.0 as i64 - b.0 as i64).abs() + (a.1 as i64 - b.1 as i64).abs();
            assert_eq!(dist, 1, "consecutive cells must be 4-adjacent");
        }
    }

    #[test]
    fn unreachable_goal_surrounded_by_blocked_returns_empty() {
        let mut grid = uniform_grid(5, CellLabel::Free);
        set(&mut grid, (2, 1), CellLabel::Blocked);
        set(&mut grid, (2, 3), CellLabel::Blocked);
        set(&mut grid, (1, 2), CellLabel::Blocked);
        set(&mut grid, (3, 2), CellLabel::Blocked);
        let mut planner = Planner::new();
        let plan = planner.plan(&grid, (0, 0), (2, 2));
        assert!(plan.is_empty());
    }

    #[test]
    fn path_never_steps_on_a_blocked_cell() {
        let mut grid = uniform_grid(8, CellLabel::Free);
        for y in 0..6 {
            set(&mut grid, (4, y), CellLabel::Blocked);
        }
        let mut planner = Planner::new();
        let plan = planner.plan(&grid, (0, 0), (7, 0));
        assert!(!plan.is_empty());
        for &c in &plan.cells {
            assert_ne!(grid.label(c.0, c.1), CellLabel::Blocked);
        }
    }

    #[test]
    fn unknown_cells_are_traversable() {
        let mut grid = uniform_grid(4, CellLabel::Unknown);
        set(&mut grid, (0, 0), CellLabel::Free);
        set(&mut grid, (3, 3), CellLabel::Free);
        let mut planner = Planner::new();
        let plan = planner.plan(&grid, (0, 0), (3, 3));
        assert!(!plan.is_empty());
        assert_eq!(plan.cells.first(), Some(&(0, 0)));
        assert_eq!(plan.cells.last(), Some(&(3, 3)));
    }

    #[test]
    fn neighbour_order_is_deterministic_across_repeated_calls() {
        let grid = uniform_grid(6, CellLabel::Free);
        let mut p1 = Planner::new();
        let mut p2 = Planner::new();
        let a = p1.plan(&grid, (0, 0), (5, 5));
        let b = p2.plan(&grid, (0, 0), (5, 5));
        assert_eq!(a.cells, b.cells);
    }
}
