//! Route calculation over a region's warp graph, fuel- and toll-aware.

use pathfinding::prelude::dijkstra;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::models::{SectorIndex, WarpLink};

/// Adjacency view of one region's warp graph, assembled from the shard's
/// link table.
pub struct WarpGraph {
    edges: BTreeMap<SectorIndex, Vec<(SectorIndex, WarpLink)>>,
}

#[derive(Debug)]
pub struct Route {
    pub hops: Vec<SectorIndex>,
    pub total_cost: i32,
    pub total_tolls: i64,
}

impl WarpGraph {
    pub fn from_links(links: Vec<(SectorIndex, SectorIndex, WarpLink)>) -> WarpGraph {
        let mut edges: BTreeMap<SectorIndex, Vec<(SectorIndex, WarpLink)>> = BTreeMap::new();
        for (from, to, link) in links {
            edges.entry(from).or_default().push((to, link));
        }
        WarpGraph { edges }
    }

    pub fn neighbors(&self, sector: SectorIndex) -> &[(SectorIndex, WarpLink)] {
        self.edges.get(&sector).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Cheapest route by travel cost, tolls folded in at one credit per
    /// cost unit so a free detour beats an expensive shortcut.
    pub fn route(&self, from: SectorIndex, to: SectorIndex) -> Result<Route> {
        if from == to {
            return Ok(Route {
                hops: vec![from],
                total_cost: 0,
                total_tolls: 0,
            });
        }
        let result = dijkstra(
            &from,
            |sector| {
                self.neighbors(*sector)
                    .iter()
                    .map(|(next, link)| {
                        let toll_weight = link.toll.unwrap_or(0).min(i32::MAX as i64) as i32;
                        (*next, link.travel_cost.max(1) + toll_weight)
                    })
                    .collect::<Vec<_>>()
            },
            |sector| *sector == to,
        );
        let (hops, _weight) = result.ok_or(Error::NotFound("route"))?;
        let mut total_cost = 0;
        let mut total_tolls = 0;
        for pair in hops.windows(2) {
            let link = self
                .neighbors(pair[0])
                .iter()
                .find(|(next, _)| *next == pair[1])
                .map(|(_, link)| link)
                .ok_or(Error::NotFound("route"))?;
            total_cost += link.travel_cost;
            total_tolls += link.toll.unwrap_or(0);
        }
        Ok(Route {
            hops,
            total_cost,
            total_tolls,
        })
    }

    /// Fuel needed for a route equals its summed travel cost.
    pub fn fuel_required(route: &Route) -> i32 {
        route.total_cost
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn link(cost: i32, toll: Option<i64>) -> WarpLink {
        WarpLink {
            to: SectorIndex(0), // overwritten by from_links pairing
            travel_cost: cost,
            toll,
            restriction: None,
        }
    }

    fn graph() -> WarpGraph {
        // 1 -2- 2 -2- 3, plus a direct 1-3 with a heavy toll
        let s = SectorIndex;
        WarpGraph::from_links(vec![
            (s(1), s(2), link(2, None)),
            (s(2), s(1), link(2, None)),
            (s(2), s(3), link(2, None)),
            (s(3), s(2), link(2, None)),
            (s(1), s(3), link(1, Some(100))),
            (s(3), s(1), link(1, Some(100))),
        ])
    }

    #[test]
    fn test_route_avoids_expensive_toll() {
        let route = graph().route(SectorIndex(1), SectorIndex(3)).unwrap();
        assert_eq!(route.hops, vec![SectorIndex(1), SectorIndex(2), SectorIndex(3)]);
        assert_eq!(route.total_cost, 4);
        assert_eq!(route.total_tolls, 0);
    }

    #[test]
    fn test_self_route_is_empty() {
        let route = graph().route(SectorIndex(2), SectorIndex(2)).unwrap();
        assert_eq!(route.hops, vec![SectorIndex(2)]);
        assert_eq!(route.total_cost, 0);
    }

    #[test]
    fn test_unreachable_is_not_found() {
        let err = graph().route(SectorIndex(1), SectorIndex(9)).unwrap_err();
        assert_eq!(err.code().as_str(), "RESOURCE_NOT_FOUND");
    }
}
