//! Shortest-path (graph) travel-time solver.
//!
//! Nodes of the grid cell containing the source are seeded with straight-ray
//! times, then a Dijkstra sweep relaxes the 26-neighbour stencil. Each edge
//! costs its Cartesian length times the mean slowness of its two end nodes.

use super::{FieldSolver, SolverError};
use crate::field::{FieldGeometry, ScalarField3D, SolverCoords};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Relative tolerance (of the node interval) for a source on the domain edge.
const DOMAIN_TOLERANCE: f64 = 1e-6;

/// Seed nodes closer to the source than this (km) are the source.
const SOURCE_SNAP_KM: f64 = 1e-6;

/// Default solver used by the pipeline binaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestPathSolver;

impl ShortestPathSolver {
    pub fn new() -> Self {
        Self
    }
}

impl FieldSolver for ShortestPathSolver {
    fn solve(
        &self,
        velocity: &ScalarField3D,
        source: SolverCoords,
    ) -> Result<ScalarField3D, SolverError> {
        let geometry = *velocity.geometry();
        let slowness = slowness(velocity)?;
        let seeds = containing_cell(&geometry, source.0)?;

        let positions: Vec<[f64; 3]> = (0..geometry.node_count())
            .map(|idx| geometry.to_cartesian(geometry.node_coords(geometry.unravel(idx))))
            .collect();
        let source_xyz = geometry.to_cartesian(source.0);

        let mut times = vec![f64::INFINITY; positions.len()];
        let mut settled = vec![false; positions.len()];
        let mut heap = BinaryHeap::new();

        for node in seeds {
            let idx = geometry.index(node);
            let d = distance(source_xyz, positions[idx]);
            let time = if d < SOURCE_SNAP_KM { 0.0 } else { d * slowness[idx] };
            if time < times[idx] {
                times[idx] = time;
                heap.push(Candidate { time, idx });
            }
        }

        while let Some(Candidate { time, idx }) = heap.pop() {
            if settled[idx] {
                continue;
            }
            settled[idx] = true;

            for next in neighbours(&geometry, geometry.unravel(idx)) {
                let nidx = geometry.index(next);
                if settled[nidx] {
                    continue;
                }
                let edge = distance(positions[idx], positions[nidx])
                    * 0.5
                    * (slowness[idx] + slowness[nidx]);
                let candidate = time + edge;
                if candidate < times[nidx] {
                    times[nidx] = candidate;
                    heap.push(Candidate {
                        time: candidate,
                        idx: nidx,
                    });
                }
            }
        }

        let unreached = times.iter().filter(|t| !t.is_finite()).count();
        if unreached > 0 {
            return Err(SolverError::NotConverged { unreached });
        }

        Ok(velocity.with_values(times))
    }

    fn name(&self) -> &'static str {
        "shortest-path"
    }
}

/// Heap entry ordered so the smallest time pops first.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    time: f64,
    idx: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

fn slowness(velocity: &ScalarField3D) -> Result<Vec<f64>, SolverError> {
    let geometry = velocity.geometry();
    velocity
        .values()
        .iter()
        .enumerate()
        .map(|(idx, &v)| {
            if v.is_finite() && v > 0.0 {
                Ok(1.0 / v)
            } else {
                Err(SolverError::InvalidVelocity {
                    node: geometry.unravel(idx),
                    value: v,
                })
            }
        })
        .collect()
}

/// Corner nodes of the grid cell containing `coords`.
fn containing_cell(
    geometry: &FieldGeometry,
    coords: [f64; 3],
) -> Result<Vec<[usize; 3]>, SolverError> {
    let min = geometry.min_coords;
    let max = geometry.max_coords();

    let mut ranges = [[0usize; 2]; 3];
    for axis in 0..3 {
        let tolerance = DOMAIN_TOLERANCE * geometry.node_intervals[axis];
        let c = coords[axis];
        if !c.is_finite() || c < min[axis] - tolerance || c > max[axis] + tolerance {
            return Err(SolverError::SourceOutOfDomain { coords, min, max });
        }

        let n = geometry.npts[axis];
        if n == 1 {
            ranges[axis] = [0, 0];
            continue;
        }
        let offset = ((c - min[axis]) / geometry.node_intervals[axis]).floor();
        let lower = (offset.max(0.0) as usize).min(n - 2);
        ranges[axis] = [lower, lower + 1];
    }

    let mut nodes = Vec::with_capacity(8);
    for i in ranges[0][0]..=ranges[0][1] {
        for j in ranges[1][0]..=ranges[1][1] {
            for k in ranges[2][0]..=ranges[2][1] {
                nodes.push([i, j, k]);
            }
        }
    }
    Ok(nodes)
}

/// In-bounds members of the 26-neighbour stencil around `node`.
fn neighbours(geometry: &FieldGeometry, node: [usize; 3]) -> impl Iterator<Item = [usize; 3]> + '_ {
    (0..27usize)
        .filter(|&n| n != 13)
        .filter_map(move |n| {
            let offsets = [n / 9, (n / 3) % 3, n % 3];
            let mut next = [0usize; 3];
            for axis in 0..3 {
                let shifted = (node[axis] + offsets[axis]).checked_sub(1)?;
                if shifted >= geometry.npts[axis] {
                    return None;
                }
                next[axis] = shifted;
            }
            Some(next)
        })
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}
