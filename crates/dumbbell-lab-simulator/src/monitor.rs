//! Per-flow packet accounting and the post-run reduction into loss and throughput.

use dumbbell_lab_abstract::{FiveTuple, Packet};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DropReason {
    QueueFull,
    LinkError,
    NoRoute,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowCounters {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub first_tx: Option<Duration>,
    pub last_rx: Option<Duration>,
    pub queue_drops: u64,
    pub error_drops: u64,
    pub no_route_drops: u64,
}

/// Classifies every packet by five-tuple. Flow ids start at 1 and follow the
/// order in which flows are first seen; each direction is its own flow.
#[derive(Debug, Default)]
pub struct FlowMonitor {
    ids: HashMap<FiveTuple, u32>,
    flows: Vec<(FiveTuple, FlowCounters)>,
}

impl FlowMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn classify(&mut self, tuple: FiveTuple) -> &mut FlowCounters {
        let next_id = self.flows.len() as u32 + 1;
        let id = *self.ids.entry(tuple).or_insert(next_id);
        if id == next_id {
            self.flows.push((tuple, FlowCounters::default()));
        }
        &mut self.flows[id as usize - 1].1
    }

    /// A packet left its originating node.
    pub fn record_tx(&mut self, packet: &Packet, now: Duration) {
        let counters = self.classify(packet.five_tuple());
        counters.tx_packets += 1;
        counters.tx_bytes += packet.size() as u64;
        counters.first_tx.get_or_insert(now);
    }

    /// A packet reached its destination node.
    pub fn record_rx(&mut self, packet: &Packet, now: Duration) {
        let counters = self.classify(packet.five_tuple());
        counters.rx_packets += 1;
        counters.rx_bytes += packet.size() as u64;
        counters.last_rx = Some(now);
    }

    pub fn record_drop(&mut self, packet: &Packet, reason: DropReason) {
        let counters = self.classify(packet.five_tuple());
        match reason {
            DropReason::QueueFull => counters.queue_drops += 1,
            DropReason::LinkError => counters.error_drops += 1,
            DropReason::NoRoute => counters.no_route_drops += 1,
        }
    }

    pub fn flow_id(&self, tuple: &FiveTuple) -> Option<u32> {
        self.ids.get(tuple).copied()
    }

    pub fn flows(&self) -> impl Iterator<Item = (u32, &FiveTuple, &FlowCounters)> {
        self.flows
            .iter()
            .enumerate()
            .map(|(i, (tuple, counters))| (i as u32 + 1, tuple, counters))
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowStatsRecord {
    pub flow_id: u32,
    pub tuple: FiveTuple,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub first_tx: Option<Duration>,
    pub last_rx: Option<Duration>,
    pub lost_packets: u64,
    /// Percent of sent packets not received; 0 when nothing was sent.
    pub loss_ratio: f64,
    /// Bits per second over `[first_tx, last_rx]`; `None` when that window is undefined.
    pub throughput_bps: Option<f64>,
    pub queue_drops: u64,
    pub error_drops: u64,
}

impl FlowStatsRecord {
    fn from_counters(flow_id: u32, tuple: FiveTuple, c: &FlowCounters) -> Self {
        let lost_packets = c.tx_packets.saturating_sub(c.rx_packets);
        let loss_ratio = if c.tx_packets == 0 {
            0.0
        } else {
            lost_packets as f64 * 100.0 / c.tx_packets as f64
        };
        let throughput_bps = match (c.first_tx, c.last_rx) {
            (Some(first), Some(last)) if last > first => {
                Some(c.rx_bytes as f64 * 8.0 / (last - first).as_secs_f64())
            }
            _ => None,
        };
        Self {
            flow_id,
            tuple,
            tx_packets: c.tx_packets,
            rx_packets: c.rx_packets,
            tx_bytes: c.tx_bytes,
            rx_bytes: c.rx_bytes,
            first_tx: c.first_tx,
            last_rx: c.last_rx,
            lost_packets,
            loss_ratio,
            throughput_bps,
            queue_drops: c.queue_drops,
            error_drops: c.error_drops,
        }
    }

    /// The report block printed for this flow.
    pub fn render(&self) -> String {
        let throughput = self
            .throughput_bps
            .map_or_else(|| "NaN".to_string(), |bps| bps.to_string());
        format!(
            "----Flow ID:{}\n{}\nSent Packets = {}\nReceived Packets = {}\nLost Packets = {}\nPacket loss ratio = {}%\nThroughput = {} bits/s\n",
            self.flow_id,
            self.tuple,
            self.tx_packets,
            self.rx_packets,
            self.lost_packets,
            self.loss_ratio,
            throughput
        )
    }
}

pub struct FlowStatsAggregator;

impl FlowStatsAggregator {
    /// Reduce the monitor's counters. Never fails: a flow with nothing sent gets a
    /// zero loss ratio and an undefined throughput, without affecting the others.
    pub fn aggregate(monitor: &FlowMonitor) -> BTreeMap<u32, FlowStatsRecord> {
        monitor
            .flows()
            .map(|(id, tuple, counters)| {
                let record = FlowStatsRecord::from_counters(id, *tuple, counters);
                if record.throughput_bps.is_none() {
                    warn!(flow = id, %tuple, "throughput undefined: empty activity window");
                }
                (id, record)
            })
            .collect()
    }

    pub fn render(records: &BTreeMap<u32, FlowStatsRecord>) -> String {
        let mut out = String::new();
        for record in records.values() {
            let _ = write!(out, "{}", record.render());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const A: Ipv4Addr = Ipv4Addr::new(10, 1, 0, 1);
    const B: Ipv4Addr = Ipv4Addr::new(10, 2, 0, 2);

    fn data() -> Packet {
        Packet::new_data(A, B, 49153, 50000, 0, 340)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn ids_follow_first_sighting_and_split_directions() {
        let mut mon = FlowMonitor::new();
        mon.record_tx(&data(), ms(0));
        mon.record_tx(&Packet::new_ack(B, A, 50000, 49153, 340, 65535), ms(10));
        mon.record_tx(&data(), ms(20));
        assert_eq!(mon.flow_id(&data().five_tuple()), Some(1));
        assert_eq!(mon.len(), 2);
    }

    #[test]
    fn loss_and_throughput_over_active_window() {
        let mut mon = FlowMonitor::new();
        for i in 0..10 {
            mon.record_tx(&data(), ms(1000 + i));
        }
        for i in 0..8 {
            mon.record_rx(&data(), ms(1500 + i));
        }
        let records = FlowStatsAggregator::aggregate(&mon);
        let r = &records[&1];
        assert_eq!(r.lost_packets, 2);
        assert_eq!(r.loss_ratio, 20.0);
        // 8 * 380 bytes over 0.507 s
        let expected = 8.0 * 380.0 * 8.0 / 0.507;
        assert!((r.throughput_bps.unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn nothing_sent_means_zero_loss_and_undefined_throughput() {
        let mut mon = FlowMonitor::new();
        mon.record_drop(&data(), DropReason::QueueFull);
        mon.record_tx(&Packet::new_ack(B, A, 50000, 49153, 0, 1), ms(5));
        let records = FlowStatsAggregator::aggregate(&mon);
        let r = &records[&1];
        assert_eq!(r.tx_packets, 0);
        assert_eq!(r.loss_ratio, 0.0);
        assert!(r.throughput_bps.is_none());
        assert!(r.render().contains("Throughput = NaN bits/s"));
        // the other flow is unaffected
        assert_eq!(records[&2].tx_packets, 1);
    }

    #[test]
    fn lost_never_underflows() {
        let mut mon = FlowMonitor::new();
        mon.record_rx(&data(), ms(5));
        let r = &FlowStatsAggregator::aggregate(&mon)[&1];
        assert_eq!(r.lost_packets, 0);
        assert!(r.loss_ratio >= 0.0 && r.loss_ratio <= 100.0);
    }

    #[test]
    fn report_block_layout() {
        let mut mon = FlowMonitor::new();
        mon.record_tx(&data(), ms(0));
        mon.record_rx(&data(), ms(500));
        let text = FlowStatsAggregator::render(&FlowStatsAggregator::aggregate(&mon));
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "----Flow ID:1");
        assert_eq!(lines[1], "10.1.0.1:49153 -> 10.2.0.2:50000");
        assert_eq!(lines[2], "Sent Packets = 1");
        assert_eq!(lines[3], "Received Packets = 1");
        assert_eq!(lines[4], "Lost Packets = 0");
        assert_eq!(lines[5], "Packet loss ratio = 0%");
        assert_eq!(lines[6], "Throughput = 6080 bits/s");
    }
}
