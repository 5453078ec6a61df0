//! Rectangle navigation mesh built from a tile grid.
//!
//! Walkable tiles are merged into rectangles, oversized rectangles are split
//! so that A* over cell centres stays close to the true geometric distance,
//! and the resulting cell corridor is straightened with a funnel pass.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::geometry::{Rect, Vec2};

/// Cells larger than this (in tiles) along either axis get split
pub const MAX_CELL_SIZE: f32 = 4.0;

const EDGE_EPSILON: f32 = 1e-4;

/// Shared edge between two neighbouring cells
#[derive(Debug, Clone, Copy)]
struct Link {
    to: usize,
    a: Vec2,
    b: Vec2,
}

#[derive(Debug, Clone)]
pub struct NavMesh {
    cells: Vec<Rect>,
    links: Vec<Vec<Link>>,
    clearance: f32,
}

impl NavMesh {
    /// Build a mesh over a `width` x `height` grid of unit tiles.
    pub fn from_grid(
        width: usize,
        height: usize,
        clearance: f32,
        walkable: impl Fn(usize, usize) -> bool,
    ) -> Self {
        let mut cells = merge_tiles(width, height, &walkable);
        split_oversized(&mut cells);
        let links = link_cells(&cells);
        Self {
            cells,
            links,
            clearance,
        }
    }

    pub fn cells(&self) -> &[Rect] {
        &self.cells
    }

    /// Index of the cell containing `p`
    pub fn locate(&self, p: Vec2) -> Option<usize> {
        self.cells.iter().position(|c| c.contains(p))
    }

    /// Closest cell to `p` and the closest point inside it
    fn nearest(&self, p: Vec2) -> Option<(usize, Vec2)> {
        if let Some(i) = self.locate(p) {
            return Some((i, p));
        }
        self.cells
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.distance_sq_to(p).total_cmp(&b.distance_sq_to(p)))
            .map(|(i, cell)| (i, cell.clamp(p)))
    }

    /// Polyline from `from` to `to`, or `None` when they are not connected.
    ///
    /// Endpoints outside the mesh are first moved to the nearest walkable
    /// point. The first point of the result is the (possibly moved) start.
    pub fn find_path(&self, from: Vec2, to: Vec2) -> Option<Vec<Vec2>> {
        let (start_cell, start) = self.nearest(from)?;
        let (goal_cell, goal) = self.nearest(to)?;

        if start_cell == goal_cell {
            return Some(vec![start, goal]);
        }

        let corridor = self.search(start_cell, start, goal_cell, goal)?;
        let portals = self.portals(&corridor, start, goal);
        Some(string_pull(&portals))
    }

    /// A* over cells, distances measured between cell centres
    fn search(&self, start_cell: usize, start: Vec2, goal_cell: usize, goal: Vec2) -> Option<Vec<usize>> {
        let n = self.cells.len();
        let mut best = vec![f32::INFINITY; n];
        let mut came_from: Vec<Option<usize>> = vec![None; n];
        let mut open = BinaryHeap::new();

        best[start_cell] = 0.0;
        open.push(OpenNode {
            estimate: start.distance(goal),
            cost: 0.0,
            cell: start_cell,
        });

        while let Some(OpenNode { cost, cell, .. }) = open.pop() {
            if cell == goal_cell {
                let mut corridor = vec![cell];
                let mut current = cell;
                while let Some(prev) = came_from[current] {
                    corridor.push(prev);
                    current = prev;
                }
                corridor.reverse();
                return Some(corridor);
            }
            if cost > best[cell] {
                continue;
            }
            let here = if cell == start_cell {
                start
            } else {
                self.cells[cell].center()
            };
            for link in &self.links[cell] {
                let there = if link.to == goal_cell {
                    goal
                } else {
                    self.cells[link.to].center()
                };
                let next_cost = cost + here.distance(there);
                if next_cost < best[link.to] {
                    best[link.to] = next_cost;
                    came_from[link.to] = Some(cell);
                    open.push(OpenNode {
                        estimate: next_cost + there.distance(goal),
                        cost: next_cost,
                        cell: link.to,
                    });
                }
            }
        }

        None
    }

    /// Portal list (left, right) for the corridor, framed by the endpoints
    fn portals(&self, corridor: &[usize], start: Vec2, goal: Vec2) -> Vec<(Vec2, Vec2)> {
        let mut portals = Vec::with_capacity(corridor.len() + 1);
        portals.push((start, start));

        for pair in corridor.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let Some(link) = self.links[from].iter().find(|l| l.to == to) else {
                continue;
            };
            let (a, b) = shrink_segment(link.a, link.b, self.clearance);
            let dir = self.cells[to].center() - self.cells[from].center();
            let mid = (a + b) * 0.5;
            if dir.cross(a - mid) > 0.0 {
                portals.push((a, b));
            } else {
                portals.push((b, a));
            }
        }

        portals.push((goal, goal));
        portals
    }
}

/// Heap entry, ordered so the lowest estimate pops first
#[derive(Debug, Clone, Copy)]
struct OpenNode {
    estimate: f32,
    cost: f32,
    cell: usize,
}

impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenNode {}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .estimate
            .total_cmp(&self.estimate)
            .then_with(|| other.cell.cmp(&self.cell))
    }
}

/// Greedy merge of walkable tiles into rectangles, row-major
fn merge_tiles(width: usize, height: usize, walkable: &impl Fn(usize, usize) -> bool) -> Vec<Rect> {
    let mut taken = vec![false; width * height];
    let mut cells = Vec::new();
    let free = |taken: &[bool], x: usize, y: usize| walkable(x, y) && !taken[y * width + x];

    for y in 0..height {
        for x in 0..width {
            if !free(&taken, x, y) {
                continue;
            }
            let mut w = 1;
            while x + w < width && free(&taken, x + w, y) {
                w += 1;
            }
            let mut h = 1;
            while y + h < height && (x..x + w).all(|tx| free(&taken, tx, y + h)) {
                h += 1;
            }
            for ty in y..y + h {
                for tx in x..x + w {
                    taken[ty * width + tx] = true;
                }
            }
            cells.push(Rect::new(x as f32, y as f32, (x + w) as f32, (y + h) as f32));
        }
    }

    cells
}

/// Halve cells along whichever axis exceeds [`MAX_CELL_SIZE`]
fn split_oversized(cells: &mut Vec<Rect>) {
    let mut i = 0;
    while i < cells.len() {
        let cell = cells[i];
        if cell.width() > MAX_CELL_SIZE {
            let mid = cell.min.x + cell.width() / 2.0;
            cells[i] = Rect::new(cell.min.x, cell.min.y, mid, cell.max.y);
            cells.push(Rect::new(mid, cell.min.y, cell.max.x, cell.max.y));
        } else if cell.height() > MAX_CELL_SIZE {
            let mid = cell.min.y + cell.height() / 2.0;
            cells[i] = Rect::new(cell.min.x, cell.min.y, cell.max.x, mid);
            cells.push(Rect::new(cell.min.x, mid, cell.max.x, cell.max.y));
        } else {
            i += 1;
        }
    }
}

fn link_cells(cells: &[Rect]) -> Vec<Vec<Link>> {
    let mut links = vec![Vec::new(); cells.len()];
    for i in 0..cells.len() {
        for j in (i + 1)..cells.len() {
            if let Some((a, b)) = shared_edge(&cells[i], &cells[j]) {
                links[i].push(Link { to: j, a, b });
                links[j].push(Link { to: i, a, b });
            }
        }
    }
    links
}

fn shared_edge(p: &Rect, q: &Rect) -> Option<(Vec2, Vec2)> {
    let touches = |a: f32, b: f32| (a - b).abs() < EDGE_EPSILON;

    if touches(p.max.x, q.min.x) || touches(q.max.x, p.min.x) {
        let x = if touches(p.max.x, q.min.x) { p.max.x } else { p.min.x };
        let lo = p.min.y.max(q.min.y);
        let hi = p.max.y.min(q.max.y);
        if hi - lo > EDGE_EPSILON {
            return Some((Vec2::new(x, lo), Vec2::new(x, hi)));
        }
    }
    if touches(p.max.y, q.min.y) || touches(q.max.y, p.min.y) {
        let y = if touches(p.max.y, q.min.y) { p.max.y } else { p.min.y };
        let lo = p.min.x.max(q.min.x);
        let hi = p.max.x.min(q.max.x);
        if hi - lo > EDGE_EPSILON {
            return Some((Vec2::new(lo, y), Vec2::new(hi, y)));
        }
    }
    None
}

/// Pull both ends of a portal in by `margin`, collapsing short portals to their midpoint
fn shrink_segment(a: Vec2, b: Vec2, margin: f32) -> (Vec2, Vec2) {
    let len = a.distance(b);
    if len <= 2.0 * margin {
        let mid = (a + b) * 0.5;
        return (mid, mid);
    }
    let dir = (b - a) * (1.0 / len);
    (a + dir * margin, b - dir * margin)
}

/// Funnel algorithm over (left, right) portals
fn string_pull(portals: &[(Vec2, Vec2)]) -> Vec<Vec2> {
    let start = portals[0].0;
    let mut points = vec![start];

    let mut apex = start;
    let mut left = portals[0].0;
    let mut right = portals[0].1;
    let (mut apex_index, mut left_index, mut right_index) = (0, 0, 0);

    let mut i = 1;
    while i < portals.len() {
        let (new_left, new_right) = portals[i];

        // Tighten the right side
        if (right - apex).cross(new_right - apex) >= 0.0 {
            if apex == right || (left - apex).cross(new_right - apex) < 0.0 {
                right = new_right;
                right_index = i;
            } else {
                // Right crossed over left, left becomes a corner
                points.push(left);
                apex = left;
                apex_index = left_index;
                right = apex;
                right_index = apex_index;
                i = apex_index + 1;
                continue;
            }
        }

        // Tighten the left side
        if (left - apex).cross(new_left - apex) <= 0.0 {
            if apex == left || (right - apex).cross(new_left - apex) > 0.0 {
                left = new_left;
                left_index = i;
            } else {
                points.push(right);
                apex = right;
                apex_index = right_index;
                left = apex;
                left_index = apex_index;
                i = apex_index + 1;
                continue;
            }
        }

        i += 1;
    }

    let goal = portals[portals.len() - 1].0;
    if points.last() != Some(&goal) {
        points.push(goal);
    }
    points
}
