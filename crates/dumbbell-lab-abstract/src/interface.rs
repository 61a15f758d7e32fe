use serde::Serialize;
use std::time::Duration;

use crate::metric::Metric;
use crate::packet::Packet;

/// The capability the engine hands to an application for the duration of one callback.
/// Everything requested through it takes effect after the callback returns, in request order.
pub trait SystemContext {
    /// Hand a packet to the node's IP layer.
    fn send_packet(&mut self, packet: Packet);

    /// Start (or restart) timer `timer_id`, firing `delay` from now.
    /// Restarting a running timer supersedes the earlier expiry.
    fn start_timer(&mut self, delay: Duration, timer_id: u32);

    /// Cancel a running timer.
    fn cancel_timer(&mut self, timer_id: u32);

    /// Current simulated time.
    fn now(&self) -> Duration;

    fn log(&mut self, message: &str);

    /// Report a change of a traced state variable as `(old, new)`.
    fn notify(&mut self, _metric: Metric, _old: f64, _new: f64) {
        // Default no-op so untraced environments don't need to care.
    }
}

/// An application installed on a node: started and stopped at scheduled times,
/// fed with the packets addressed to its port and with its own timer expiries.
pub trait Application {
    /// Port this application receives on.
    fn local_port(&self) -> u16;

    fn start(&mut self, ctx: &mut dyn SystemContext);

    fn stop(&mut self, ctx: &mut dyn SystemContext);

    fn on_packet(&mut self, ctx: &mut dyn SystemContext, packet: Packet);

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32);

    /// Final counters, read after the run.
    fn report(&self) -> ApplicationReport;
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ApplicationReport {
    pub kind: &'static str,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub segments_sent: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    pub fast_recoveries: u64,
}
