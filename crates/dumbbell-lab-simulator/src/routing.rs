use std::collections::VecDeque;
use std::net::Ipv4Addr;

use crate::engine::{LinkId, NodeId};
use crate::link::{PointToPointLink, Side};
use crate::topology::AddressBlock;

/// Outgoing interface for one destination subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub block: AddressBlock,
    pub link: LinkId,
    /// Our side of `link`.
    pub side: Side,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn lookup(&self, dst: Ipv4Addr) -> Option<&Route> {
        self.routes.iter().find(|route| route.block.contains(dst))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Shortest-path tables for every node: for each link subnet, the first hop
/// towards the nearer endpoint of that link.
pub fn compute_routes(node_count: usize, links: &[PointToPointLink]) -> Vec<RoutingTable> {
    let mut adjacency: Vec<Vec<(LinkId, Side, NodeId)>> = vec![Vec::new(); node_count];
    for link in links {
        let [a, b] = link.endpoints;
        adjacency[a.0].push((link.id, Side::A, b));
        adjacency[b.0].push((link.id, Side::B, a));
    }

    (0..node_count)
        .map(|origin| {
            let (dist, first_hop) = breadth_first(origin, &adjacency);
            let routes = links
                .iter()
                .filter_map(|link| {
                    if let Some(side) = link.side_of(NodeId(origin)) {
                        return Some(Route {
                            block: link.block,
                            link: link.id,
                            side,
                        });
                    }
                    let nearest = link
                        .endpoints
                        .iter()
                        .filter_map(|n| dist[n.0].map(|d| (d, n.0)))
                        .min()?;
                    let (link_id, side) = first_hop[nearest.1]?;
                    Some(Route {
                        block: link.block,
                        link: link_id,
                        side,
                    })
                })
                .collect();
            RoutingTable { routes }
        })
        .collect()
}

type FirstHop = Option<(LinkId, Side)>;

fn breadth_first(
    origin: usize,
    adjacency: &[Vec<(LinkId, Side, NodeId)>],
) -> (Vec<Option<usize>>, Vec<FirstHop>) {
    let mut dist = vec![None; adjacency.len()];
    let mut first_hop: Vec<FirstHop> = vec![None; adjacency.len()];
    let mut frontier = VecDeque::from([origin]);
    dist[origin] = Some(0);

    while let Some(node) = frontier.pop_front() {
        let d = dist[node].unwrap_or(0);
        for &(link, side, next) in &adjacency[node] {
            if dist[next.0].is_some() {
                continue;
            }
            dist[next.0] = Some(d + 1);
            first_hop[next.0] = if node == origin {
                Some((link, side))
            } else {
                first_hop[node]
            };
            frontier.push_back(next.0);
        }
    }
    (dist, first_hop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::AddressAllocator;
    use dumbbell_lab_abstract::{DataRate, LinkParams};
    use std::time::Duration;

    fn chain(n: usize) -> Vec<PointToPointLink> {
        let params = LinkParams::new(DataRate::from_mbps(1), Duration::from_millis(1));
        let mut alloc = AddressAllocator::new();
        (0..n - 1)
            .map(|i| {
                PointToPointLink::new(
                    LinkId(i),
                    NodeId(i),
                    NodeId(i + 1),
                    params,
                    alloc.allocate().unwrap(),
                    10,
                    None,
                )
            })
            .collect()
    }

    #[test]
    fn every_node_reaches_every_subnet() {
        let links = chain(4);
        let tables = compute_routes(4, &links);
        for table in &tables {
            assert_eq!(table.len(), 3);
        }
    }

    #[test]
    fn routes_point_along_the_chain() {
        let links = chain(4);
        let tables = compute_routes(4, &links);
        // node 0 reaches the far subnet through its only link
        let far = links[2].block.host(2);
        assert_eq!(tables[0].lookup(far).map(|r| r.link), Some(LinkId(0)));
        // node 2 goes left for link 0, right for link 2
        let near_left = links[0].block.host(1);
        let route = tables[2].lookup(near_left).unwrap();
        assert_eq!((route.link, route.side), (LinkId(1), Side::B));
        let route = tables[2].lookup(far).unwrap();
        assert_eq!((route.link, route.side), (LinkId(2), Side::A));
    }

    #[test]
    fn unknown_destinations_have_no_route() {
        let tables = compute_routes(4, &chain(4));
        assert!(tables[1].lookup(Ipv4Addr::new(192, 168, 0, 1)).is_none());
    }
}
