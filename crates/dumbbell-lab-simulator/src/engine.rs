use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tracing::{debug, info};

use dumbbell_lab_abstract::{
    Application, ApplicationReport, HarnessError, LinkParams, Metric, Packet, Result,
    SystemContext,
};
use dumbbell_lab_transport::{PacketSink, SocketDefaults, TcpBulkSender, TransportSelection};

use crate::ascii::{AsciiEvent, AsciiTrace};
use crate::error_model::RateErrorModel;
use crate::link::{Enqueued, PointToPointLink, Side};
use crate::monitor::{DropReason, FlowMonitor};
use crate::routing::{RoutingTable, compute_routes};
use crate::topology::AddressBlock;
use crate::tracer::MetricsTracer;

/// First port handed to senders on each node.
pub const EPHEMERAL_PORT_BASE: u16 = 49153;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AppId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node/{}", self.0)
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app/{}", self.0)
    }
}

#[derive(Debug)]
pub enum EventType {
    AppStart {
        app: AppId,
    },
    AppStop {
        app: AppId,
    },
    TimerExpiry {
        app: AppId,
        timer_id: u32,
        generation: u64,
    },
    /// The transmitter of `link` on side `from` finished clocking out a packet.
    TransmitComplete {
        link: LinkId,
        from: Side,
    },
    PacketArrival {
        link: LinkId,
        from: Side,
        packet: Packet,
    },
    Stop,
}

#[derive(Debug)]
struct Event {
    time: Duration,
    event_type: EventType,
    id: u64, // enqueue order, breaks ties between events at the same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Actions buffered during one application callback
#[derive(Default)]
struct ActionBuffer {
    outgoing_packets: Vec<Packet>,
    timers_start: Vec<(Duration, u32)>,
    timers_cancel: Vec<u32>,
    logs: Vec<String>,
    notifications: Vec<(Metric, f64, f64)>,
}

/// Context handed to an application for the duration of one callback
struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: Duration,
}

impl SystemContext for ScopedContext<'_> {
    fn send_packet(&mut self, packet: Packet) {
        self.buffer.outgoing_packets.push(packet);
    }

    fn start_timer(&mut self, delay: Duration, timer_id: u32) {
        self.buffer.timers_start.push((delay, timer_id));
    }

    fn cancel_timer(&mut self, timer_id: u32) {
        self.buffer.timers_cancel.push(timer_id);
    }

    fn now(&self) -> Duration {
        self.now
    }

    fn log(&mut self, message: &str) {
        self.buffer.logs.push(message.to_string());
    }

    fn notify(&mut self, metric: Metric, old: f64, new: f64) {
        self.buffer.notifications.push((metric, old, new));
    }
}

struct Node {
    name: String,
    /// One address per attached link, in attachment order.
    interfaces: Vec<Ipv4Addr>,
    routes: RoutingTable,
    ports: HashMap<u16, AppId>,
    next_ephemeral_port: u16,
}

struct InstalledApp {
    node: NodeId,
    app: Box<dyn Application>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineCounters {
    pub events: u64,
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_forwarded: u64,
    pub queue_drops: u64,
    pub error_drops: u64,
    pub no_route_drops: u64,
    /// Delivered to a node with nothing listening on the destination port.
    pub unclaimed: u64,
}

pub struct Simulator {
    time: Duration,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,
    halted: bool,

    nodes: Vec<Node>,
    links: Vec<PointToPointLink>,
    apps: Vec<InstalledApp>,

    /// Timer generations to handle cancellation.
    /// Key: (app, timer_id), Value: generation counter
    timer_generations: HashMap<(AppId, u32), u64>,

    socket_defaults: SocketDefaults,
    transport_selected: bool,
    sockets_created: bool,

    next_packet_uid: u64,
    monitor: Option<FlowMonitor>,
    tracer: Option<MetricsTracer>,
    ascii: Option<AsciiTrace>,
    counters: EngineCounters,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            time: Duration::ZERO,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            halted: false,
            nodes: Vec::new(),
            links: Vec::new(),
            apps: Vec::new(),
            timer_generations: HashMap::new(),
            socket_defaults: SocketDefaults::default(),
            transport_selected: false,
            sockets_created: false,
            next_packet_uid: 0,
            monitor: None,
            tracer: None,
            ascii: None,
            counters: EngineCounters::default(),
        }
    }

    // ---- socket defaults ----

    pub fn socket_defaults(&self) -> &SocketDefaults {
        &self.socket_defaults
    }

    /// Install the transport variant every socket will use. Allowed once, before any socket exists.
    pub fn select_transport(&mut self, selection: TransportSelection) -> Result<()> {
        if self.transport_selected || self.sockets_created {
            return Err(HarnessError::DefaultsLocked);
        }
        self.socket_defaults.selection = selection;
        self.transport_selected = true;
        Ok(())
    }

    pub fn set_segment_size(&mut self, bytes: u32) -> Result<()> {
        if self.sockets_created {
            return Err(HarnessError::DefaultsLocked);
        }
        if bytes == 0 {
            return Err(HarnessError::invalid("segment_size", "must be positive"));
        }
        self.socket_defaults.segment_size = bytes;
        Ok(())
    }

    pub fn set_receive_window(&mut self, bytes: u32) -> Result<()> {
        if self.sockets_created {
            return Err(HarnessError::DefaultsLocked);
        }
        self.socket_defaults.rcv_window = bytes;
        Ok(())
    }

    // ---- topology ----

    pub fn add_node(&mut self, name: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.to_string(),
            interfaces: Vec::new(),
            routes: RoutingTable::default(),
            ports: HashMap::new(),
            next_ephemeral_port: EPHEMERAL_PORT_BASE,
        });
        id
    }

    /// Connect `a` (host `.1` of `block`) and `b` (host `.2`).
    pub fn add_link(
        &mut self,
        a: NodeId,
        b: NodeId,
        params: LinkParams,
        block: AddressBlock,
        queue_limit: usize,
        error_model: Option<RateErrorModel>,
    ) -> LinkId {
        let id = LinkId(self.links.len());
        let link = PointToPointLink::new(id, a, b, params, block, queue_limit, error_model);
        for side in [Side::A, Side::B] {
            let addr = link.address(side);
            if let Some(node) = self.nodes.get_mut(link.node(side).0) {
                node.interfaces.push(addr);
            }
        }
        self.links.push(link);
        id
    }

    pub fn populate_routing(&mut self) {
        let tables = compute_routes(self.nodes.len(), &self.links);
        for (node, table) in self.nodes.iter_mut().zip(tables) {
            node.routes = table;
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn link(&self, id: LinkId) -> &PointToPointLink {
        &self.links[id.0]
    }

    pub fn links(&self) -> &[PointToPointLink] {
        &self.links
    }

    pub fn node_addresses(&self, id: NodeId) -> Vec<Ipv4Addr> {
        self.nodes
            .get(id.0)
            .map(|n| n.interfaces.clone())
            .unwrap_or_default()
    }

    // ---- applications ----

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| HarnessError::invalid("node", format!("{id} does not exist")))
    }

    pub fn install_application(&mut self, node: NodeId, app: Box<dyn Application>) -> Result<AppId> {
        let id = AppId(self.apps.len());
        let port = app.local_port();
        self.node_mut(node)?.ports.insert(port, id);
        self.apps.push(InstalledApp { node, app });
        Ok(id)
    }

    pub fn install_sink(&mut self, node: NodeId, port: u16) -> Result<AppId> {
        let sink = PacketSink::new(port, self.socket_defaults.rcv_window);
        let id = self.install_application(node, Box::new(sink))?;
        self.sockets_created = true;
        Ok(id)
    }

    /// Bulk sender on `node`, bound to the node's first interface and the next ephemeral port.
    pub fn install_bulk_sender(
        &mut self,
        node: NodeId,
        remote: SocketAddrV4,
        max_bytes: Option<u64>,
    ) -> Result<AppId> {
        let entry = self.node_mut(node)?;
        let local_addr = entry
            .interfaces
            .first()
            .copied()
            .ok_or_else(|| HarnessError::invalid("node", format!("{node} has no interface")))?;
        let port = entry.next_ephemeral_port;
        entry.next_ephemeral_port = port
            .checked_add(1)
            .ok_or_else(|| HarnessError::invalid("node", format!("{node} ran out of ephemeral ports")))?;

        let sender = TcpBulkSender::new(
            &self.socket_defaults,
            (local_addr, port),
            (*remote.ip(), remote.port()),
            max_bytes,
        );
        let id = self.install_application(node, Box::new(sender))?;
        self.sockets_created = true;
        Ok(id)
    }

    pub fn schedule_start(&mut self, app: AppId, at: Duration) {
        self.push_event(at, EventType::AppStart { app });
    }

    pub fn schedule_stop(&mut self, app: AppId, at: Duration) {
        self.push_event(at, EventType::AppStop { app });
    }

    pub fn app_report(&self, app: AppId) -> Option<ApplicationReport> {
        self.apps.get(app.0).map(|a| a.app.report())
    }

    pub fn app_node(&self, app: AppId) -> Option<NodeId> {
        self.apps.get(app.0).map(|a| a.node)
    }

    // ---- instrumentation ----

    pub fn enable_flow_monitor(&mut self) {
        self.monitor.get_or_insert_with(FlowMonitor::new);
    }

    pub fn flow_monitor(&self) -> Option<&FlowMonitor> {
        self.monitor.as_ref()
    }

    pub fn attach_tracer(&mut self, tracer: MetricsTracer) -> Result<()> {
        if self.apps.get(tracer.target_app().0).is_none() {
            return Err(HarnessError::TraceTargetMissing {
                flow: tracer.target_flow(),
            });
        }
        self.tracer = Some(tracer);
        Ok(())
    }

    pub fn tracer(&self) -> Option<&MetricsTracer> {
        self.tracer.as_ref()
    }

    pub fn enable_ascii(&mut self, trace: AsciiTrace) {
        self.ascii = Some(trace);
    }

    pub fn counters(&self) -> EngineCounters {
        self.counters
    }

    // ---- event loop ----

    fn push_event(&mut self, time: Duration, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    /// Halt the run when simulated time reaches `at`. Events already queued for
    /// the same instant run first.
    pub fn stop(&mut self, at: Duration) {
        self.push_event(at, EventType::Stop);
    }

    pub fn now(&self) -> Duration {
        self.time
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn run(&mut self) {
        info!(
            nodes = self.nodes.len(),
            links = self.links.len(),
            apps = self.apps.len(),
            "simulation starting"
        );
        while self.step() {}
        info!(
            time = self.time.as_secs_f64(),
            events = self.counters.events,
            "simulation halted"
        );
    }

    /// Process the next event. Returns false once the queue is empty or a stop was reached.
    pub fn step(&mut self) -> bool {
        if self.halted {
            return false;
        }
        let Some(event) = self.event_queue.pop() else {
            return false;
        };

        self.time = event.time;
        self.counters.events += 1;

        match event.event_type {
            EventType::Stop => {
                debug!("stop reached at {:?}", self.time);
                self.halted = true;
                return false;
            }
            EventType::AppStart { app } => {
                self.dispatch(app, |app, ctx| app.start(ctx));
            }
            EventType::AppStop { app } => {
                self.dispatch(app, |app, ctx| app.stop(ctx));
            }
            EventType::TimerExpiry {
                app,
                timer_id,
                generation,
            } => {
                // Check if this timer event is still valid by comparing generations
                let current = self.timer_generations.get(&(app, timer_id)).copied();
                if current != Some(generation) {
                    debug!("skipping superseded timer {} of {}", timer_id, app);
                    return true;
                }
                self.dispatch(app, |app, ctx| app.on_timer(ctx, timer_id));
            }
            EventType::TransmitComplete { link, from } => {
                if let Some(next) = self.links[link.0].channel_mut(from).transmit_complete() {
                    self.start_transmission(link, from, next);
                }
            }
            EventType::PacketArrival { link, from, packet } => {
                self.on_arrival(link, from, packet);
            }
        }
        true
    }

    fn dispatch(
        &mut self,
        app: AppId,
        callback: impl FnOnce(&mut dyn Application, &mut dyn SystemContext),
    ) {
        let mut buffer = ActionBuffer::default();
        {
            let Some(installed) = self.apps.get_mut(app.0) else {
                return;
            };
            let mut ctx = ScopedContext {
                buffer: &mut buffer,
                now: self.time,
            };
            callback(installed.app.as_mut(), &mut ctx);
        }
        self.process_actions(app, buffer);
    }

    fn process_actions(&mut self, app: AppId, buffer: ActionBuffer) {
        let Some(node) = self.app_node(app) else {
            return;
        };

        for log in buffer.logs {
            debug!("[{} {}] {}", self.nodes[node.0].name, app, log);
        }

        if let Some(tracer) = self.tracer.as_mut()
            && tracer.target_app() == app
        {
            for (metric, old, new) in buffer.notifications {
                tracer.record(metric, self.time, old, new);
            }
        }

        // Cancelling or restarting bumps the generation, invalidating queued expiries.
        for timer_id in buffer.timers_cancel {
            *self.timer_generations.entry((app, timer_id)).or_insert(0) += 1;
        }
        for (delay, timer_id) in buffer.timers_start {
            let generation = self.timer_generations.entry((app, timer_id)).or_insert(0);
            *generation += 1;
            let generation = *generation;
            self.push_event(
                self.time + delay,
                EventType::TimerExpiry {
                    app,
                    timer_id,
                    generation,
                },
            );
        }

        for mut packet in buffer.outgoing_packets {
            packet.uid = self.next_packet_uid;
            self.next_packet_uid += 1;
            self.counters.packets_sent += 1;
            if let Some(monitor) = self.monitor.as_mut() {
                monitor.record_tx(&packet, self.time);
            }
            self.route(node, packet);
        }
    }

    fn route(&mut self, node: NodeId, packet: Packet) {
        let Some(route) = self.nodes[node.0].routes.lookup(packet.dst).copied() else {
            debug!("{} has no route to {}", node, packet.dst);
            self.counters.no_route_drops += 1;
            if let Some(monitor) = self.monitor.as_mut() {
                monitor.record_drop(&packet, DropReason::NoRoute);
            }
            return;
        };

        self.ascii_event(AsciiEvent::Enqueue, node, route.link, &packet);
        let link = &mut self.links[route.link.0];
        let limit = link.queue_limit;
        match link.channel_mut(route.side).enqueue(packet, limit) {
            Enqueued::Transmit(packet) => self.start_transmission(route.link, route.side, packet),
            Enqueued::Queued => {}
            Enqueued::Dropped(packet) => {
                self.counters.queue_drops += 1;
                self.ascii_event(AsciiEvent::Drop, node, route.link, &packet);
                if let Some(monitor) = self.monitor.as_mut() {
                    monitor.record_drop(&packet, DropReason::QueueFull);
                }
            }
        }
    }

    fn start_transmission(&mut self, link_id: LinkId, from: Side, packet: Packet) {
        let link = &self.links[link_id.0];
        let node = link.node(from);
        let tx_time = link.tx_time(&packet);
        let delay = link.delay();
        self.ascii_event(AsciiEvent::Dequeue, node, link_id, &packet);
        self.push_event(
            self.time + tx_time,
            EventType::TransmitComplete {
                link: link_id,
                from,
            },
        );
        self.push_event(
            self.time + tx_time + delay,
            EventType::PacketArrival {
                link: link_id,
                from,
                packet,
            },
        );
    }

    fn on_arrival(&mut self, link_id: LinkId, from: Side, packet: Packet) {
        let link = &mut self.links[link_id.0];
        let node = link.node(from.opposite());

        let dropped = link
            .error_model
            .as_mut()
            .is_some_and(|model| model.should_drop(&packet));
        if dropped {
            link.record_error_drop(from);
            self.counters.error_drops += 1;
            self.ascii_event(AsciiEvent::Drop, node, link_id, &packet);
            if let Some(monitor) = self.monitor.as_mut() {
                monitor.record_drop(&packet, DropReason::LinkError);
            }
            return;
        }

        self.ascii_event(AsciiEvent::Receive, node, link_id, &packet);
        let local = self.nodes[node.0]
            .interfaces
            .contains(&packet.dst);
        if local {
            self.deliver_local(node, packet);
        } else {
            self.counters.packets_forwarded += 1;
            self.route(node, packet);
        }
    }

    fn deliver_local(&mut self, node: NodeId, packet: Packet) {
        self.counters.packets_delivered += 1;
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.record_rx(&packet, self.time);
        }
        match self.nodes[node.0].ports.get(&packet.header.dst_port).copied() {
            Some(app) => self.dispatch(app, |app, ctx| app.on_packet(ctx, packet)),
            None => self.counters.unclaimed += 1,
        }
    }

    fn ascii_event(&mut self, event: AsciiEvent, node: NodeId, link: LinkId, packet: &Packet) {
        if let Some(ascii) = self.ascii.as_mut() {
            ascii.record(event, self.time, node, link, packet);
        }
    }

    /// Teardown: flush every trace sink. Reports the first failure after trying all of them.
    pub fn finish(&mut self) -> Result<()> {
        let tracer_result = self.tracer.as_mut().map_or(Ok(()), |t| t.finish());
        let ascii_result = self.ascii.as_mut().map_or(Ok(()), |a| a.finish());
        info!(
            events = self.counters.events,
            delivered = self.counters.packets_delivered,
            dropped = self.counters.queue_drops + self.counters.error_drops,
            "simulation finished"
        );
        tracer_result.and(ascii_result)
    }
}
