use dumbbell_lab_abstract::{HarnessError, Result};
use serde::Serialize;
use std::net::SocketAddrV4;
use std::time::Duration;
use tracing::debug;

use crate::engine::{AppId, NodeId, Simulator};
use crate::topology::Topology;

/// Port every sink listens on.
pub const SINK_PORT: u16 = 50000;
/// Senders stop this long before the receivers so in-flight data can drain.
pub const DRAIN_MARGIN: Duration = Duration::from_secs(3);

/// Everything known about one installed flow. The tracer is armed from this
/// rather than from a lookup path.
#[derive(Debug, Clone, Serialize)]
pub struct FlowHandle {
    pub index: usize,
    pub source: NodeId,
    pub sink: NodeId,
    pub sender: AppId,
    pub receiver: AppId,
    /// Sink-side address of the flow's right access link.
    pub remote: SocketAddrV4,
    pub start: Duration,
    pub sender_stop: Duration,
    pub receiver_stop: Duration,
}

impl FlowHandle {
    /// A sender whose start is not before its stop never transmits.
    pub fn is_active(&self) -> bool {
        self.start < self.sender_stop
    }
}

pub struct FlowScheduler {
    pub start_stagger: Duration,
    pub stop_time: Duration,
    /// `None` sends until stopped.
    pub payload_bytes: Option<u64>,
    pub segment_size: u32,
}

impl FlowScheduler {
    /// `start_stagger * index`, rejected when it does not fit in a `Duration`.
    pub fn start_of(&self, index: usize) -> Result<Duration> {
        u32::try_from(index)
            .ok()
            .and_then(|i| self.start_stagger.checked_mul(i))
            .ok_or_else(|| {
                HarnessError::invalid(
                    "start_time",
                    format!("start of flow {index} overflows the simulation clock"),
                )
            })
    }

    pub fn sender_stop(&self) -> Duration {
        self.stop_time.saturating_sub(DRAIN_MARGIN)
    }

    pub fn schedule(&self, sim: &mut Simulator, topology: &Topology) -> Result<Vec<FlowHandle>> {
        sim.set_segment_size(self.segment_size)?;

        let starts = topology
            .flows
            .iter()
            .map(|flow| self.start_of(flow.index))
            .collect::<Result<Vec<_>>>()?;

        let mut handles = Vec::with_capacity(topology.num_flows());
        for (flow, start) in topology.flows.iter().zip(starts) {
            let remote = SocketAddrV4::new(flow.sink_addr, SINK_PORT);
            let receiver = sim.install_sink(flow.sink, SINK_PORT)?;
            let sender = sim.install_bulk_sender(flow.source, remote, self.payload_bytes)?;

            let sender_stop = self.sender_stop();
            // A sender that would start after its stop is never started.
            if start < sender_stop {
                sim.schedule_start(sender, start);
                sim.schedule_stop(sender, sender_stop);
            }
            sim.schedule_start(receiver, start);
            sim.schedule_stop(receiver, self.stop_time);
            debug!(
                flow = flow.index,
                start = ?start,
                stop = ?sender_stop,
                remote = %remote,
                "flow scheduled"
            );

            handles.push(FlowHandle {
                index: flow.index,
                source: flow.source,
                sink: flow.sink,
                sender,
                receiver,
                remote,
                start,
                sender_stop,
                receiver_stop: self.stop_time,
            });
        }
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyBuilder;
    use dumbbell_lab_abstract::{DataRate, LinkParams};
    use std::net::Ipv4Addr;

    fn topology(sim: &mut Simulator, n: usize) -> Topology {
        let p = LinkParams::new(DataRate::from_mbps(10), Duration::from_millis(10));
        TopologyBuilder::new(p, p, p).build(sim, n).unwrap()
    }

    fn scheduler() -> FlowScheduler {
        FlowScheduler {
            start_stagger: Duration::from_millis(100),
            stop_time: Duration::from_secs(20),
            payload_bytes: None,
            segment_size: 340,
        }
    }

    #[test]
    fn start_times_increase_with_index() {
        let mut sim = Simulator::new();
        let topo = topology(&mut sim, 6);
        let handles = scheduler().schedule(&mut sim, &topo).unwrap();
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(h.start, Duration::from_millis(100) * i as u32);
            assert_eq!(h.sender_stop, Duration::from_secs(17));
            assert_eq!(h.receiver_stop, Duration::from_secs(20));
        }
        assert!(handles.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn senders_target_the_sink_interface() {
        let mut sim = Simulator::new();
        let topo = topology(&mut sim, 3);
        let handles = scheduler().schedule(&mut sim, &topo).unwrap();
        for h in &handles {
            let expected = Ipv4Addr::new(10, (2 + 2 * h.index) as u8, 0, 2);
            assert_eq!(*h.remote.ip(), expected);
            assert_eq!(h.remote.port(), SINK_PORT);
            assert!(sim.node_addresses(h.sink).contains(&expected));
        }
    }

    #[test]
    fn segment_size_is_fixed_once_sockets_exist() {
        let mut sim = Simulator::new();
        let topo = topology(&mut sim, 1);
        scheduler().schedule(&mut sim, &topo).unwrap();
        assert_eq!(sim.socket_defaults().segment_size, 340);
        assert!(matches!(sim.set_segment_size(500), Err(HarnessError::DefaultsLocked)));
    }

    #[test]
    fn late_flows_are_inactive() {
        let mut sim = Simulator::new();
        let topo = topology(&mut sim, 3);
        let sched = FlowScheduler {
            start_stagger: Duration::from_secs(9),
            stop_time: Duration::from_secs(20),
            ..scheduler()
        };
        let handles = sched.schedule(&mut sim, &topo).unwrap();
        assert!(handles[0].is_active());
        assert!(handles[1].is_active());
        assert!(!handles[2].is_active());
    }

    #[test]
    fn oversized_stagger_is_rejected_before_installing_apps() {
        let mut sim = Simulator::new();
        let topo = topology(&mut sim, 3);
        let sched = FlowScheduler {
            start_stagger: Duration::MAX / 2,
            ..scheduler()
        };
        assert_eq!(sched.start_of(1).unwrap(), Duration::MAX / 2);
        assert!(matches!(
            sched.schedule(&mut sim, &topo),
            Err(HarnessError::InvalidParameter { field: "start_time", .. })
        ));
        // no sockets were created, so defaults are still open
        sim.set_segment_size(500).unwrap();
    }
}
