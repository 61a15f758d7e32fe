//! Bulk-send TCP sender: byte sequence numbers, cumulative ACKs, no handshake.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::time::Duration;

use dumbbell_lab_abstract::{
    Application, ApplicationReport, Metric, MetricMap, Packet, SystemContext, flags,
};

use crate::congestion::{CongestionOps, CongestionState, TcpState};
use crate::recovery::RecoveryOps;
use crate::registry::SocketDefaults;
use crate::rtt::RttEstimator;

pub const RTO_TIMER: u32 = 1;
const DUP_ACK_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy)]
struct SentSegment {
    seq: u64,
    end: u64,
    sent_at: Duration,
    retransmitted: bool,
}

/// Sends `max_bytes` (or until stopped) to one sink as fast as congestion
/// control allows, and publishes its window, threshold and timer state.
pub struct TcpBulkSender {
    local_addr: Ipv4Addr,
    local_port: u16,
    remote_addr: Ipv4Addr,
    remote_port: u16,
    max_bytes: Option<u64>,

    tcb: TcpState,
    cc: Box<dyn CongestionOps>,
    recovery: Box<dyn RecoveryOps>,
    rtt: RttEstimator,
    peer_window: u32,
    dup_acks: u32,
    /// Highest sequence sent when the last loss episode began.
    recover: Option<u64>,
    outstanding: VecDeque<SentSegment>,

    running: bool,
    rto_armed: bool,
    /// Last value reported per traced metric, seeded with the pre-run state.
    published: MetricMap<f64>,

    bytes_sent: u64,
    segments_sent: u64,
    segments_acked: u64,
    retransmissions: u64,
    timeouts: u64,
    fast_recoveries: u64,
}

impl TcpBulkSender {
    pub fn new(
        defaults: &SocketDefaults,
        local: (Ipv4Addr, u16),
        remote: (Ipv4Addr, u16),
        max_bytes: Option<u64>,
    ) -> Self {
        let segment_size = defaults.segment_size.max(1);
        let cwnd = defaults
            .initial_cwnd_segments
            .max(1)
            .saturating_mul(segment_size);
        let selection = defaults.selection;
        let tcb = TcpState::new(segment_size, cwnd, defaults.initial_ssthresh);
        let rtt = RttEstimator::new(selection.rto_strategy, defaults.initial_rto, defaults.min_rto);
        let mut published = MetricMap::new();
        published.insert(Metric::CongestionWindow, tcb.cwnd as f64);
        published.insert(Metric::SlowStartThreshold, tcb.ssthresh as f64);
        published.insert(Metric::Rto, rtt.rto().as_secs_f64());
        Self {
            local_addr: local.0,
            local_port: local.1,
            remote_addr: remote.0,
            remote_port: remote.1,
            max_bytes,
            tcb,
            cc: selection.algorithm.create(),
            recovery: selection.recovery.create(),
            rtt,
            peer_window: defaults.rcv_window,
            dup_acks: 0,
            recover: None,
            outstanding: VecDeque::new(),
            running: false,
            rto_armed: false,
            published,
            bytes_sent: 0,
            segments_sent: 0,
            segments_acked: 0,
            retransmissions: 0,
            timeouts: 0,
            fast_recoveries: 0,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.tcb.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.tcb.ssthresh
    }

    pub fn congestion_state(&self) -> CongestionState {
        self.tcb.ca_state
    }

    pub fn rto(&self) -> Duration {
        self.rtt.rto()
    }

    pub fn rtt_estimator(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn recovery_algorithm(&self) -> &'static str {
        self.recovery.name()
    }

    fn data_limit(&self) -> u64 {
        self.max_bytes.unwrap_or(u64::MAX)
    }

    fn flight(&self) -> u32 {
        (self.tcb.snd_nxt.saturating_sub(self.tcb.snd_una)).min(u32::MAX as u64) as u32
    }

    fn refresh_in_flight(&mut self) {
        let dup_acks = if self.tcb.ca_state == CongestionState::Recovery {
            self.dup_acks
        } else {
            0
        };
        self.tcb.bytes_in_flight =
            self.recovery
                .pipe(self.flight(), dup_acks, self.tcb.segment_size);
    }

    fn set_state(&mut self, state: CongestionState) {
        if self.tcb.ca_state != state {
            self.tcb.ca_state = state;
            self.cc.congestion_state_set(&self.tcb, state);
        }
    }

    fn send_pending(&mut self, ctx: &mut dyn SystemContext) {
        let limit = self.data_limit();
        loop {
            let seq = self.tcb.snd_nxt;
            // A stopped sender only repairs what it already sent.
            if seq >= limit || (!self.running && seq >= self.tcb.high_tx_mark) {
                break;
            }
            let len = (limit - seq).min(self.tcb.segment_size as u64) as u32;
            self.refresh_in_flight();
            let cwnd_ok = self.tcb.bytes_in_flight as u64 + len as u64 <= self.tcb.cwnd as u64;
            let rwnd_ok = self.flight() as u64 + len as u64 <= self.peer_window as u64;
            if !cwnd_ok || !rwnd_ok {
                break;
            }
            self.transmit(ctx, seq, len);
            self.tcb.snd_nxt = seq + len as u64;
            self.tcb.high_tx_mark = self.tcb.high_tx_mark.max(self.tcb.snd_nxt);
        }
    }

    fn transmit(&mut self, ctx: &mut dyn SystemContext, seq: u64, len: u32) {
        let end = seq + len as u64;
        let mut packet = Packet::new_data(
            self.local_addr,
            self.remote_addr,
            self.local_port,
            self.remote_port,
            seq,
            len,
        );
        if end == self.data_limit() {
            packet.header.flags |= flags::FIN;
        }

        if seq < self.tcb.high_tx_mark {
            self.retransmissions += 1;
            if let Some(segment) = self.outstanding.iter_mut().find(|s| s.seq == seq) {
                segment.retransmitted = true;
            }
        } else {
            self.outstanding.push_back(SentSegment {
                seq,
                end,
                sent_at: ctx.now(),
                retransmitted: false,
            });
        }
        if self.tcb.ca_state == CongestionState::Recovery {
            self.recovery.update_bytes_sent(len);
        }
        self.segments_sent += 1;
        self.bytes_sent += len as u64;
        ctx.send_packet(packet);

        if !self.rto_armed {
            ctx.start_timer(self.rtt.rto(), RTO_TIMER);
            self.rto_armed = true;
        }
    }

    fn retransmit_first_unacked(&mut self, ctx: &mut dyn SystemContext) {
        let Some(front) = self.outstanding.front().copied() else {
            return;
        };
        self.transmit(ctx, front.seq, (front.end - front.seq) as u32);
    }

    fn restart_rto(&mut self, ctx: &mut dyn SystemContext) {
        if self.tcb.snd_una < self.tcb.high_tx_mark {
            ctx.start_timer(self.rtt.rto(), RTO_TIMER);
            self.rto_armed = true;
        } else if self.rto_armed {
            ctx.cancel_timer(RTO_TIMER);
            self.rto_armed = false;
        }
    }

    fn on_ack(&mut self, ctx: &mut dyn SystemContext, packet: &Packet) {
        let ack = packet.header.ack;
        self.peer_window = packet.header.window;
        self.tcb.now = ctx.now();

        if ack > self.tcb.high_tx_mark {
            ctx.log(&format!("ignoring ACK {} beyond highest sent byte", ack));
        } else if ack > self.tcb.snd_una {
            self.on_new_ack(ctx, ack);
        } else if ack == self.tcb.snd_una && self.tcb.snd_una < self.tcb.high_tx_mark {
            self.on_dup_ack(ctx);
        }

        self.send_pending(ctx);
        self.commit_traces(ctx);
    }

    fn on_new_ack(&mut self, ctx: &mut dyn SystemContext, ack: u64) {
        let delivered = (ack - self.tcb.snd_una).min(u32::MAX as u64) as u32;
        let now = ctx.now();

        let mut segments = 0;
        let mut last_sent_at = None;
        let mut ambiguous = false;
        while let Some(front) = self.outstanding.pop_front() {
            if front.end > ack {
                self.outstanding.push_front(front);
                break;
            }
            ambiguous |= front.retransmitted;
            last_sent_at = Some(front.sent_at);
            segments += 1;
        }
        // Karn: an ACK covering retransmitted data gives no sample
        let sample = last_sent_at
            .filter(|_| !ambiguous)
            .map(|sent_at| now.saturating_sub(sent_at));

        self.tcb.snd_una = ack;
        self.tcb.snd_nxt = self.tcb.snd_nxt.max(ack);
        self.segments_acked += segments as u64;
        self.dup_acks = 0;

        if let Some(rtt) = sample {
            self.rtt.sample(rtt);
            self.tcb.last_rtt = Some(rtt);
            self.tcb.min_rtt = Some(self.tcb.min_rtt.map_or(rtt, |min| min.min(rtt)));
        }
        self.refresh_in_flight();
        self.cc.pkts_acked(&self.tcb, segments, sample);
        if sample.is_some() {
            self.publish_rtt_sample(ctx);
        }

        let recovered = self.recover.is_none_or(|recover| ack >= recover);
        match self.tcb.ca_state {
            CongestionState::Recovery if recovered => {
                self.recovery.exit(&mut self.tcb);
                self.set_state(CongestionState::Open);
            }
            CongestionState::Recovery => {
                // partial ACK: the next hole is lost too
                self.recovery.do_recovery(&mut self.tcb, delivered, false);
                self.retransmit_first_unacked(ctx);
            }
            CongestionState::Loss => {
                self.cc.increase_window(&mut self.tcb, segments);
                if recovered {
                    self.set_state(CongestionState::Open);
                }
            }
            CongestionState::Open | CongestionState::Disorder => {
                self.set_state(CongestionState::Open);
                self.cc.increase_window(&mut self.tcb, segments);
            }
        }

        self.restart_rto(ctx);
    }

    fn on_dup_ack(&mut self, ctx: &mut dyn SystemContext) {
        self.dup_acks += 1;
        match self.tcb.ca_state {
            CongestionState::Recovery => {
                self.refresh_in_flight();
                let segment = self.tcb.segment_size;
                self.recovery.do_recovery(&mut self.tcb, segment, true);
            }
            CongestionState::Loss => {}
            CongestionState::Open | CongestionState::Disorder => {
                let may_recover = self
                    .recover
                    .is_none_or(|recover| self.tcb.snd_una > recover);
                if self.dup_acks >= DUP_ACK_THRESHOLD && may_recover {
                    self.enter_fast_recovery(ctx);
                } else {
                    self.set_state(CongestionState::Disorder);
                }
            }
        }
    }

    fn enter_fast_recovery(&mut self, ctx: &mut dyn SystemContext) {
        let flight = self.flight();
        self.tcb.ssthresh = self.cc.ssthresh(&self.tcb, flight);
        self.recover = Some(self.tcb.high_tx_mark);
        self.fast_recoveries += 1;
        self.set_state(CongestionState::Recovery);

        self.refresh_in_flight();
        let segment = self.tcb.segment_size;
        self.recovery.enter(&mut self.tcb, self.dup_acks, segment);
        ctx.log(&format!(
            "fast retransmit of {} after {} duplicate ACKs, ssthresh {}",
            self.tcb.snd_una, self.dup_acks, self.tcb.ssthresh
        ));
        self.retransmit_first_unacked(ctx);
        self.restart_rto(ctx);
    }

    fn on_retransmission_timeout(&mut self, ctx: &mut dyn SystemContext) {
        self.rto_armed = false;
        if self.tcb.snd_una >= self.tcb.high_tx_mark {
            return;
        }
        self.timeouts += 1;
        self.tcb.now = ctx.now();

        if self.tcb.ca_state != CongestionState::Loss {
            let flight = self.flight();
            self.tcb.ssthresh = self.cc.ssthresh(&self.tcb, flight);
        }
        self.tcb.cwnd = self.tcb.segment_size;
        self.recover = Some(self.tcb.high_tx_mark);
        self.dup_acks = 0;
        self.set_state(CongestionState::Loss);
        self.rtt.backoff();
        ctx.log(&format!(
            "retransmission timeout at {}, rto backed off to {:?}",
            self.tcb.snd_una,
            self.rtt.rto()
        ));

        // go back N
        self.tcb.snd_nxt = self.tcb.snd_una;
        self.send_pending(ctx);
        self.commit_traces(ctx);
    }

    fn publish(&mut self, ctx: &mut dyn SystemContext, metric: Metric, value: f64, always: bool) {
        let previous = self.published.insert(metric, value);
        let old = previous.unwrap_or(0.0);
        if always || previous.is_none() || old != value {
            ctx.notify(metric, old, value);
        }
    }

    /// Report cwnd, ssthresh and rto if they moved since the last report.
    fn commit_traces(&mut self, ctx: &mut dyn SystemContext) {
        self.publish(ctx, Metric::CongestionWindow, self.tcb.cwnd as f64, false);
        self.publish(ctx, Metric::SlowStartThreshold, self.tcb.ssthresh as f64, false);
        self.publish(ctx, Metric::Rto, self.rtt.rto().as_secs_f64(), false);
    }

    fn publish_rtt_sample(&mut self, ctx: &mut dyn SystemContext) {
        let srtt = self.rtt.srtt().unwrap_or_default().as_secs_f64();
        let ratio = if srtt > 0.0 {
            self.rtt.rto().as_secs_f64() / srtt
        } else {
            0.0
        };
        let mean_retransmission = if self.segments_acked > 0 {
            self.retransmissions as f64 / self.segments_acked as f64
        } else {
            0.0
        };
        self.publish(ctx, Metric::Rtt, srtt, true);
        self.publish(ctx, Metric::RtoOverRtt, ratio, true);
        self.publish(ctx, Metric::MeanRetransmission, mean_retransmission, true);
    }
}

impl Application for TcpBulkSender {
    fn local_port(&self) -> u16 {
        self.local_port
    }

    fn start(&mut self, ctx: &mut dyn SystemContext) {
        self.running = true;
        ctx.log(&format!(
            "{} sender {}:{} -> {}:{} started",
            self.cc.name(),
            self.local_addr,
            self.local_port,
            self.remote_addr,
            self.remote_port
        ));
        self.send_pending(ctx);
    }

    fn stop(&mut self, ctx: &mut dyn SystemContext) {
        self.running = false;
        ctx.log(&format!(
            "sender stopped after {} bytes, {} unacknowledged",
            self.bytes_sent,
            self.tcb.high_tx_mark - self.tcb.snd_una
        ));
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet) {
        if packet.header.is_ack() && packet.payload_len == 0 {
            self.on_ack(ctx, &packet);
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
        if timer_id == RTO_TIMER {
            self.on_retransmission_timeout(ctx);
        }
    }

    fn report(&self) -> ApplicationReport {
        ApplicationReport {
            kind: "bulk-send",
            bytes_sent: self.bytes_sent,
            bytes_received: 0,
            segments_sent: self.segments_sent,
            retransmissions: self.retransmissions,
            timeouts: self.timeouts,
            fast_recoveries: self.fast_recoveries,
        }
    }
}
