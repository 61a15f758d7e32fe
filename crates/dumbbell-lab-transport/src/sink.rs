use std::collections::BTreeMap;

use dumbbell_lab_abstract::{Application, ApplicationReport, Packet, SystemContext};

/// Receiving end of a bulk flow. Acknowledges every segment cumulatively and
/// buffers out-of-order data, shrinking the advertised window by what it holds.
pub struct PacketSink {
    port: u16,
    rcv_window: u32,
    rcv_nxt: u64,
    /// Out-of-order segments by starting sequence.
    reassembly: BTreeMap<u64, u32>,
    fin_at: Option<u64>,
    running: bool,
    complete: bool,
}

impl PacketSink {
    pub fn new(port: u16, rcv_window: u32) -> Self {
        Self {
            port,
            rcv_window,
            rcv_nxt: 0,
            reassembly: BTreeMap::new(),
            fin_at: None,
            running: false,
            complete: false,
        }
    }

    /// Bytes delivered in order so far.
    pub fn total_rx(&self) -> u64 {
        self.rcv_nxt
    }

    fn buffered_bytes(&self) -> u32 {
        self.reassembly.values().fold(0u32, |acc, len| acc.saturating_add(*len))
    }

    fn accept(&mut self, seq: u64, len: u32) {
        let end = seq + len as u64;
        if end <= self.rcv_nxt {
            return;
        }
        if seq > self.rcv_nxt {
            let slot = self.reassembly.entry(seq).or_insert(0);
            *slot = (*slot).max(len);
            return;
        }
        self.rcv_nxt = end;
        while let Some((&start, &held)) = self.reassembly.first_key_value() {
            if start > self.rcv_nxt {
                break;
            }
            self.reassembly.pop_first();
            self.rcv_nxt = self.rcv_nxt.max(start + held as u64);
        }
    }
}

impl Application for PacketSink {
    fn local_port(&self) -> u16 {
        self.port
    }

    fn start(&mut self, ctx: &mut dyn SystemContext) {
        self.running = true;
        ctx.log(&format!("sink listening on port {}", self.port));
    }

    fn stop(&mut self, ctx: &mut dyn SystemContext) {
        self.running = false;
        ctx.log(&format!("sink stopped with {} bytes received", self.rcv_nxt));
    }

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet) {
        if !self.running || packet.payload_len == 0 {
            return;
        }
        let seq = packet.header.seq;
        if packet.header.is_fin() {
            self.fin_at = Some(seq + packet.payload_len as u64);
        }
        self.accept(seq, packet.payload_len);

        if !self.complete && self.fin_at.is_some_and(|fin| self.rcv_nxt >= fin) {
            self.complete = true;
            ctx.log(&format!("stream complete after {} bytes", self.rcv_nxt));
        }

        let window = self.rcv_window.saturating_sub(self.buffered_bytes());
        ctx.send_packet(Packet::new_ack(
            packet.dst,
            packet.src,
            self.port,
            packet.header.src_port,
            self.rcv_nxt,
            window,
        ));
    }

    fn on_timer(&mut self, _ctx: &mut dyn SystemContext, _timer_id: u32) {}

    fn report(&self) -> ApplicationReport {
        ApplicationReport {
            kind: "packet-sink",
            bytes_received: self.rcv_nxt,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::test_support::RecordingContext;
    use std::net::Ipv4Addr;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 1, 0, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(10, 2, 0, 2);

    fn data(seq: u64, len: u32) -> Packet {
        Packet::new_data(SRC, DST, 49153, 50000, seq, len)
    }

    fn running_sink() -> (PacketSink, RecordingContext) {
        let mut ctx = RecordingContext::default();
        let mut sink = PacketSink::new(50000, 1000);
        sink.start(&mut ctx);
        (sink, ctx)
    }

    #[test]
    fn acknowledges_in_order_data() {
        let (mut sink, mut ctx) = running_sink();
        sink.on_packet(&mut ctx, data(0, 100));
        let acks = ctx.take_sent();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].header.ack, 100);
        assert_eq!(acks[0].header.window, 1000);
        assert_eq!(acks[0].dst, SRC);
        assert_eq!(acks[0].header.dst_port, 49153);
        assert_eq!(sink.total_rx(), 100);
    }

    #[test]
    fn holes_produce_duplicate_acks_and_shrink_window() {
        let (mut sink, mut ctx) = running_sink();
        sink.on_packet(&mut ctx, data(0, 100));
        sink.on_packet(&mut ctx, data(200, 100));
        sink.on_packet(&mut ctx, data(300, 100));
        let acks = ctx.take_sent();
        assert_eq!(acks[1].header.ack, 100);
        assert_eq!(acks[2].header.ack, 100);
        assert_eq!(acks[2].header.window, 800);

        sink.on_packet(&mut ctx, data(100, 100));
        let acks = ctx.take_sent();
        assert_eq!(acks[0].header.ack, 400);
        assert_eq!(acks[0].header.window, 1000);
        assert_eq!(sink.report().bytes_received, 400);
    }

    #[test]
    fn stopped_sink_ignores_data() {
        let (mut sink, mut ctx) = running_sink();
        sink.stop(&mut ctx);
        sink.on_packet(&mut ctx, data(0, 100));
        assert!(ctx.take_sent().is_empty());
        assert_eq!(sink.total_rx(), 0);
    }
}
