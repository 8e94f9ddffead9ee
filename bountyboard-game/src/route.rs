//! Route planning over the jump graph.
//!
//! Routes are the cheapest path between two systems, found with A*. The
//! straight-line heuristic is only used when it is admissible for the whole
//! graph; otherwise the search runs as plain uniform-cost search. Among
//! equal-cost candidates the one pushed first wins, which makes routes
//! reproducible for a given graph definition order.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use thiserror::Error;

use crate::catalog::SystemGraph;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("unknown system '{0}'")]
    UnknownSystem(String),
    #[error("no route from '{start}' to '{end}'")]
    NoRoute { start: String, end: String },
}

/// Open-set entry. Ordering: (estimated total ASC, push order ASC).
#[derive(Debug, Clone, Copy)]
struct Frontier {
    estimate: f64,
    seq: u64,
    node: usize,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.estimate
            .total_cmp(&other.estimate)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Cheapest route from `start` to `end`, both endpoints included.
///
/// Callers are expected to pick distinct, jump-gated endpoints; the planner
/// itself enforces neither.
///
/// # Errors
///
/// [`RouteError::UnknownSystem`] if an endpoint is not in the graph,
/// [`RouteError::NoRoute`] if `end` is unreachable from `start`.
pub fn find_route(start: &str, end: &str, graph: &SystemGraph) -> Result<Vec<String>, RouteError> {
    let origin = graph
        .position(start)
        .ok_or_else(|| RouteError::UnknownSystem(start.to_string()))?;
    let goal = graph
        .position(end)
        .ok_or_else(|| RouteError::UnknownSystem(end.to_string()))?;

    let informed = graph.heuristic_admissible();
    let heuristic = |node: usize| {
        if informed {
            graph.distance_between(node, goal).unwrap_or(0.0)
        } else {
            0.0
        }
    };

    let mut cost = vec![f64::INFINITY; graph.len()];
    let mut came_from: Vec<Option<usize>> = vec![None; graph.len()];
    let mut closed = vec![false; graph.len()];
    let mut open = BinaryHeap::new();
    let mut seq = 0_u64;

    cost[origin] = 0.0;
    open.push(Reverse(Frontier {
        estimate: heuristic(origin),
        seq,
        node: origin,
    }));

    while let Some(Reverse(current)) = open.pop() {
        if closed[current.node] {
            continue;
        }
        if current.node == goal {
            return Ok(rebuild(graph, &came_from, goal));
        }
        closed[current.node] = true;

        for (next, lane) in graph.lanes(current.node) {
            if closed[next] {
                continue;
            }
            let tentative = cost[current.node] + lane;
            if tentative < cost[next] {
                cost[next] = tentative;
                came_from[next] = Some(current.node);
                seq += 1;
                open.push(Reverse(Frontier {
                    estimate: tentative + heuristic(next),
                    seq,
                    node: next,
                }));
            }
        }
    }

    Err(RouteError::NoRoute {
        start: start.to_string(),
        end: end.to_string(),
    })
}

fn rebuild(graph: &SystemGraph, came_from: &[Option<usize>], goal: usize) -> Vec<String> {
    let mut path = vec![graph.at(goal).name.clone()];
    let mut cursor = goal;
    while let Some(previous) = came_from[cursor] {
        path.push(graph.at(previous).name.clone());
        cursor = previous;
    }
    path.reverse();
    path
}

/// Sum of lane costs along a route, or `None` if two consecutive systems are
/// not linked.
#[must_use]
pub fn route_cost(route: &[String], graph: &SystemGraph) -> Option<f64> {
    route.windows(2).try_fold(0.0, |total, pair| {
        let from = graph.position(&pair[0])?;
        let to = graph.position(&pair[1])?;
        graph
            .lanes(from)
            .find(|(target, _)| *target == to)
            .map(|(_, lane)| total + lane)
    })
}
