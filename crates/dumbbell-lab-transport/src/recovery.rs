//! Fast recovery strategies, entered on the third duplicate ACK.

use crate::congestion::TcpState;

pub trait RecoveryOps {
    fn name(&self) -> &'static str;

    /// Called once on entering fast recovery, after `ssthresh` was lowered.
    fn enter(&mut self, tcb: &mut TcpState, dup_acks: u32, delivered: u32);

    /// Called for every further ACK while recovering. `dup_ack` tells a duplicate
    /// from a partial ACK of new data.
    fn do_recovery(&mut self, tcb: &mut TcpState, delivered: u32, dup_ack: bool);

    fn exit(&mut self, tcb: &mut TcpState);

    /// Account bytes put on the wire while recovering.
    fn update_bytes_sent(&mut self, _bytes: u32) {}

    /// Estimate of the bytes still in the network. Duplicate ACKs only count as
    /// having left the network for strategies that do not inflate the window.
    fn pipe(&self, flight: u32, _dup_acks: u32, _segment_size: u32) -> u32 {
        flight
    }
}

/// NewReno window inflation (RFC 6582).
#[derive(Debug, Default)]
pub struct ClassicRecovery;

impl RecoveryOps for ClassicRecovery {
    fn name(&self) -> &'static str {
        "TcpClassicRecovery"
    }

    fn enter(&mut self, tcb: &mut TcpState, dup_acks: u32, _delivered: u32) {
        tcb.cwnd = tcb.ssthresh.saturating_add(dup_acks * tcb.segment_size);
    }

    fn do_recovery(&mut self, tcb: &mut TcpState, delivered: u32, dup_ack: bool) {
        if dup_ack {
            tcb.cwnd = tcb.cwnd.saturating_add(tcb.segment_size);
        } else {
            // partial ACK: deflate by what was acknowledged, keep one segment for the retransmission
            tcb.cwnd = tcb
                .cwnd
                .saturating_sub(delivered)
                .saturating_add(tcb.segment_size)
                .max(tcb.segment_size);
        }
    }

    fn exit(&mut self, tcb: &mut TcpState) {
        tcb.cwnd = tcb.ssthresh;
    }
}

/// Proportional rate reduction (RFC 6937) with the slow start reduction bound.
#[derive(Debug, Default)]
pub struct PrrRecovery {
    prr_delivered: u64,
    prr_out: u64,
    recovery_flight_size: u32,
}

impl RecoveryOps for PrrRecovery {
    fn name(&self) -> &'static str {
        "TcpPrrRecovery"
    }

    fn enter(&mut self, tcb: &mut TcpState, _dup_acks: u32, delivered: u32) {
        self.prr_out = 0;
        self.prr_delivered = 0;
        self.recovery_flight_size = tcb.bytes_in_flight.max(1);
        self.do_recovery(tcb, delivered, true);
    }

    fn do_recovery(&mut self, tcb: &mut TcpState, delivered: u32, _dup_ack: bool) {
        self.prr_delivered += delivered as u64;
        let pipe = tcb.bytes_in_flight as i64;
        let ssthresh = tcb.ssthresh as i64;
        let sndcnt = if pipe > ssthresh {
            let scaled = (self.prr_delivered as f64 * ssthresh as f64
                / self.recovery_flight_size as f64)
                .ceil() as i64;
            scaled - self.prr_out as i64
        } else {
            let limit = (self.prr_delivered as i64 - self.prr_out as i64).max(delivered as i64)
                + tcb.segment_size as i64;
            (ssthresh - pipe).min(limit)
        };
        let sndcnt = sndcnt.max(0);
        tcb.cwnd = (pipe + sndcnt).clamp(0, u32::MAX as i64) as u32;
    }

    fn exit(&mut self, tcb: &mut TcpState) {
        tcb.cwnd = tcb.ssthresh;
    }

    fn update_bytes_sent(&mut self, bytes: u32) {
        self.prr_out += bytes as u64;
    }

    fn pipe(&self, flight: u32, dup_acks: u32, segment_size: u32) -> u32 {
        flight.saturating_sub(dup_acks.saturating_mul(segment_size))
    }
}
