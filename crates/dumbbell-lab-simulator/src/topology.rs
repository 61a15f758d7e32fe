//! The dumbbell: two gateways joined by the bottleneck, one source and one sink per flow.

use dumbbell_lab_abstract::{HarnessError, LinkParams, Result};
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::info;

use crate::engine::{LinkId, NodeId, Simulator};
use crate::error_model::RateErrorModel;
use crate::link::DEFAULT_QUEUE_PACKETS;

/// Number of `/16` blocks in `10.0.0.0/8`.
pub const MAX_ADDRESS_BLOCKS: usize = 256;

/// A `/16` subnet owned by exactly one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AddressBlock {
    network: Ipv4Addr,
}

impl AddressBlock {
    pub const PREFIX_LEN: u8 = 16;
    const MASK: u32 = 0xFFFF_0000;

    /// Host `n` of the block: `n = 1` is `x.y.0.1`.
    pub fn host(&self, n: u32) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | (n & !Self::MASK))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & Self::MASK == u32::from(self.network)
    }

    pub fn overlaps(&self, other: &AddressBlock) -> bool {
        self.network == other.network
    }
}

impl fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, Self::PREFIX_LEN)
    }
}

/// Hands out `10.0.0.0/16`, `10.1.0.0/16`, ... in order.
#[derive(Debug, Default)]
pub struct AddressAllocator {
    next: usize,
}

impl AddressAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> Result<AddressBlock> {
        if self.next >= MAX_ADDRESS_BLOCKS {
            return Err(HarnessError::AddressExhausted {
                blocks: MAX_ADDRESS_BLOCKS,
            });
        }
        let block = AddressBlock {
            network: Ipv4Addr::new(10, self.next as u8, 0, 0),
        };
        self.next += 1;
        Ok(block)
    }
}

/// Nodes, links and addresses of one flow's path.
#[derive(Debug, Clone, Serialize)]
pub struct FlowPath {
    pub index: usize,
    pub source: NodeId,
    pub sink: NodeId,
    /// source ↔ gateway-left
    pub left_access: LinkId,
    /// gateway-right ↔ sink
    pub right_access: LinkId,
    pub access: LinkParams,
    pub source_addr: Ipv4Addr,
    pub sink_addr: Ipv4Addr,
}

#[derive(Debug, Clone, Serialize)]
pub struct Topology {
    pub gateway_left: NodeId,
    pub gateway_right: NodeId,
    pub bottleneck: LinkId,
    /// Address blocks in allocation order, which is link creation order.
    pub blocks: Vec<AddressBlock>,
    pub flows: Vec<FlowPath>,
}

impl Topology {
    pub fn num_flows(&self) -> usize {
        self.flows.len()
    }

    pub fn node_count(&self) -> usize {
        2 + 2 * self.flows.len()
    }

    pub fn link_count(&self) -> usize {
        self.blocks.len()
    }
}

pub struct TopologyBuilder {
    bottleneck: LinkParams,
    access_even: LinkParams,
    access_odd: LinkParams,
    queue_limit: usize,
    error_model: Option<RateErrorModel>,
}

impl TopologyBuilder {
    pub fn new(bottleneck: LinkParams, access_even: LinkParams, access_odd: LinkParams) -> Self {
        Self {
            bottleneck,
            access_even,
            access_odd,
            queue_limit: DEFAULT_QUEUE_PACKETS,
            error_model: None,
        }
    }

    pub fn queue_limit(mut self, packets: usize) -> Self {
        self.queue_limit = packets;
        self
    }

    /// Loss model installed on the bottleneck.
    pub fn error_model(mut self, model: RateErrorModel) -> Self {
        self.error_model = Some(model);
        self
    }

    fn access_for(&self, index: usize) -> LinkParams {
        if index % 2 == 0 {
            self.access_even
        } else {
            self.access_odd
        }
    }

    pub fn build(mut self, sim: &mut Simulator, num_flows: usize) -> Result<Topology> {
        if num_flows == 0 {
            return Err(HarnessError::NoFlows);
        }

        // Allocate every block before touching the engine so an oversized
        // request leaves nothing half-built.
        let mut allocator = AddressAllocator::new();
        let blocks = (0..1 + 2 * num_flows)
            .map(|_| allocator.allocate())
            .collect::<Result<Vec<_>>>()?;

        let gateway_left = sim.add_node("gateway-left");
        let gateway_right = sim.add_node("gateway-right");
        let sources: Vec<NodeId> = (0..num_flows)
            .map(|i| sim.add_node(&format!("source[{i}]")))
            .collect();
        let sinks: Vec<NodeId> = (0..num_flows)
            .map(|i| sim.add_node(&format!("sink[{i}]")))
            .collect();

        let queue_limit = self.queue_limit;
        let bottleneck_link = sim.add_link(
            gateway_left,
            gateway_right,
            self.bottleneck,
            blocks[0],
            queue_limit,
            self.error_model.take(),
        );

        let mut flows = Vec::with_capacity(num_flows);
        for i in 0..num_flows {
            let access = self.access_for(i);
            let left_block = blocks[1 + 2 * i];
            let right_block = blocks[2 + 2 * i];
            let left_access =
                sim.add_link(sources[i], gateway_left, access, left_block, queue_limit, None);
            let right_access =
                sim.add_link(gateway_right, sinks[i], access, right_block, queue_limit, None);
            flows.push(FlowPath {
                index: i,
                source: sources[i],
                sink: sinks[i],
                left_access,
                right_access,
                access,
                source_addr: left_block.host(1),
                sink_addr: right_block.host(2),
            });
        }

        sim.populate_routing();
        info!(
            nodes = 2 + 2 * num_flows,
            links = blocks.len(),
            "dumbbell built"
        );

        Ok(Topology {
            gateway_left,
            gateway_right,
            bottleneck: bottleneck_link,
            blocks,
            flows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dumbbell_lab_abstract::ErrorKind;
    use std::collections::HashSet;
    use std::time::Duration;

    fn params(mbps: u64, ms: u64) -> LinkParams {
        LinkParams::new(
            dumbbell_lab_abstract::DataRate::from_mbps(mbps),
            Duration::from_millis(ms),
        )
    }

    fn builder() -> TopologyBuilder {
        TopologyBuilder::new(params(10, 50), params(2, 175), params(2, 85))
    }

    #[test]
    fn allocator_walks_second_octet() {
        let mut alloc = AddressAllocator::new();
        assert_eq!(alloc.allocate().unwrap().to_string(), "10.0.0.0/16");
        let second = alloc.allocate().unwrap();
        assert_eq!(second.host(1), Ipv4Addr::new(10, 1, 0, 1));
        assert_eq!(second.host(2), Ipv4Addr::new(10, 1, 0, 2));
        assert!(second.contains(Ipv4Addr::new(10, 1, 200, 3)));
        assert!(!second.contains(Ipv4Addr::new(10, 2, 0, 1)));
    }

    #[test]
    fn allocator_exhausts_after_256_blocks() {
        let mut alloc = AddressAllocator::new();
        for _ in 0..MAX_ADDRESS_BLOCKS {
            alloc.allocate().unwrap();
        }
        let err = alloc.allocate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);
    }

    #[test]
    fn zero_flows_is_a_configuration_error() {
        let mut sim = Simulator::new();
        let err = builder().build(&mut sim, 0).unwrap_err();
        assert!(matches!(err, HarnessError::NoFlows));
        assert_eq!(sim.node_count(), 0);
    }

    #[test]
    fn too_many_flows_exhausts_addresses_before_building() {
        let mut sim = Simulator::new();
        let err = builder().build(&mut sim, 128).unwrap_err();
        assert!(matches!(err, HarnessError::AddressExhausted { .. }));
        assert_eq!(sim.node_count(), 0);
        assert!(builder().build(&mut Simulator::new(), 127).is_ok());
    }

    #[test]
    fn node_and_link_counts_follow_flow_count() {
        for n in [1usize, 2, 5, 16] {
            let mut sim = Simulator::new();
            let topo = builder().build(&mut sim, n).unwrap();
            assert_eq!(sim.node_count(), 2 + 2 * n);
            assert_eq!(sim.link_count(), 1 + 2 * n);
            assert_eq!(topo.node_count(), 2 + 2 * n);

            let distinct: HashSet<_> = topo.blocks.iter().collect();
            assert_eq!(distinct.len(), topo.blocks.len());
            for (i, a) in topo.blocks.iter().enumerate() {
                for b in &topo.blocks[i + 1..] {
                    assert!(!a.overlaps(b));
                }
            }
        }
    }

    #[test]
    fn ids_and_addresses_follow_creation_order() {
        let mut sim = Simulator::new();
        let topo = builder().build(&mut sim, 3).unwrap();
        assert_eq!(topo.gateway_left, NodeId(0));
        assert_eq!(topo.gateway_right, NodeId(1));
        assert_eq!(topo.bottleneck, LinkId(0));
        for (i, flow) in topo.flows.iter().enumerate() {
            assert_eq!(flow.source, NodeId(2 + i));
            assert_eq!(flow.sink, NodeId(2 + 3 + i));
            assert_eq!(flow.left_access, LinkId(1 + 2 * i));
            assert_eq!(flow.right_access, LinkId(2 + 2 * i));
            assert_eq!(flow.sink_addr, Ipv4Addr::new(10, (2 + 2 * i) as u8, 0, 2));
            assert_eq!(flow.source_addr, Ipv4Addr::new(10, (1 + 2 * i) as u8, 0, 1));
        }
        assert_eq!(sim.node_addresses(topo.gateway_left).len(), 4);
    }

    #[test]
    fn access_parameters_alternate_by_parity() {
        for n in [1usize, 4, 7] {
            let mut sim = Simulator::new();
            let topo = builder().build(&mut sim, n).unwrap();
            for flow in &topo.flows {
                let expected = if flow.index % 2 == 0 {
                    params(2, 175)
                } else {
                    params(2, 85)
                };
                assert_eq!(flow.access, expected);
                assert_eq!(sim.link(flow.left_access).params, expected);
                assert_eq!(sim.link(flow.right_access).params, expected);
            }
        }
    }
}
