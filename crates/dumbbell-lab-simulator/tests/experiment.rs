use dumbbell_lab_abstract::{DataRate, ExperimentConfig, HarnessError, LinkParams, Metric};
use dumbbell_lab_simulator::engine::NodeId;
use dumbbell_lab_simulator::{ExperimentDriver, ExperimentReport, TraceOutput};
use std::time::Duration;

fn run(config: ExperimentConfig) -> ExperimentReport {
    ExperimentDriver::new(config)
        .with_trace_output(TraceOutput::InMemory)
        .run()
        .unwrap()
}

fn single_lossless_flow() -> ExperimentConfig {
    let access = LinkParams::new(DataRate::from_mbps(2), Duration::from_millis(175));
    ExperimentConfig {
        num_flows: 1,
        error_p: 0.0,
        access_even: access,
        access_odd: access,
        duration: 20.0,
        ..Default::default()
    }
}

#[test]
fn single_lossless_flow_traces_every_metric() {
    let report = run(single_lossless_flow());

    assert_eq!(report.final_time, Duration::from_secs(20));
    for metric in Metric::ALL {
        let series = report.trace(metric).unwrap();
        assert_eq!(series.recorded, series.samples.len() as u64);
        assert!(series.samples.windows(2).all(|w| w[0].time <= w[1].time));
        assert!(series.samples.iter().all(|s| s.time <= Duration::from_secs(20)));
        if metric == Metric::SlowStartThreshold {
            continue;
        }
        assert!(series.samples.len() >= 2, "{metric} has too few samples");
        let at_zero = series
            .samples
            .iter()
            .filter(|s| s.time == Duration::ZERO)
            .count();
        assert_eq!(at_zero, 1, "{metric}");
    }

    // the zero-time sample is the socket's state before the run
    let first = |metric| report.trace(metric).unwrap().samples[0];
    assert_eq!(first(Metric::CongestionWindow).value, 3400.0);
    assert_eq!(first(Metric::Rto).value, 1.0);
    assert_eq!(first(Metric::Rtt).value, 0.0);
    // no loss, so ssthresh never moves and nothing is traced for it
    assert!(report.trace(Metric::SlowStartThreshold).unwrap().samples.is_empty());

    assert_eq!(report.total_lost_packets(), 0);
    assert_eq!(report.counters.queue_drops + report.counters.error_drops, 0);
    assert!(report.receiver_report(0).unwrap().bytes_received > 1_000_000);

    let rto = report.trace(Metric::Rto).unwrap();
    assert!(rto.samples.iter().all(|s| s.value >= 1.0));
}

#[test]
fn single_flow_sender_stops_before_receiver() {
    let report = run(single_lossless_flow());
    let flow = &report.flows[0];
    assert_eq!(flow.start, Duration::ZERO);
    assert_eq!(flow.sender_stop, Duration::from_secs(17));
    assert_eq!(flow.receiver_stop, Duration::from_secs(20));

    // data flow plus its ACK stream
    assert_eq!(report.flow_stats.len(), 2);
    let data = report.flow_stats.get(&1).unwrap();
    assert_eq!(data.tuple.dst_port, 50000);
    let last_rx = data.last_rx.unwrap();
    assert!(last_rx > Duration::from_secs(17) && last_rx < Duration::from_secs(19));
    assert!(data.throughput_bps.unwrap() > 1_000_000.0);
}

#[test]
fn six_flows_alternate_access_delays() {
    let config = ExperimentConfig {
        duration: 8.0,
        ..Default::default()
    };
    let report = run(config.clone());

    assert_eq!(report.flows.len(), 6);
    // one bottleneck plus two access links per flow
    assert_eq!(report.links.len(), 13);
    assert_eq!(report.links[0].endpoints, [NodeId(0), NodeId(1)]);
    for flow in &report.flows {
        let left = &report.links[1 + 2 * flow.index];
        let right = &report.links[2 + 2 * flow.index];
        let expected = if flow.index % 2 == 0 { 175 } else { 85 };
        assert_eq!(left.delay, Duration::from_millis(expected));
        assert_eq!(right.delay, Duration::from_millis(expected));
        assert_eq!(left.endpoints, [flow.source, NodeId(0)]);
        assert_eq!(right.endpoints, [NodeId(1), flow.sink]);
        assert_eq!(flow.start, config.start_stagger() * flow.index as u32);
    }
    let subnets: Vec<&str> = report.links.iter().map(|l| l.subnet.as_str()).collect();
    assert_eq!(subnets[0], "10.0.0.0/16");
    assert_eq!(subnets[12], "10.12.0.0/16");

    // every sink heard from its sender
    for flow in &report.flows {
        assert!(report.receiver_report(flow.index).unwrap().bytes_received > 0);
    }
    assert_eq!(report.flow_stats.len(), 12);
    let rendered = report.render_flow_stats();
    assert!(rendered.starts_with("----Flow ID:1\n"));
    assert!(rendered.contains("----Flow ID:12\n"));
}

#[test]
fn identical_runs_are_identical() {
    let config = ExperimentConfig {
        num_flows: 2,
        error_p: 0.05,
        duration: 10.0,
        ..Default::default()
    };
    let a = run(config.clone());
    let b = run(config);

    assert_eq!(a.counters.events, b.counters.events);
    assert_eq!(a.counters.error_drops, b.counters.error_drops);
    assert_eq!(
        a.trace(Metric::CongestionWindow).unwrap().samples,
        b.trace(Metric::CongestionWindow).unwrap().samples
    );
    let lost = |r: &ExperimentReport| -> Vec<u64> {
        r.flow_stats.values().map(|s| s.lost_packets).collect()
    };
    assert_eq!(lost(&a), lost(&b));
}

#[test]
fn run_index_changes_the_loss_pattern() {
    let base = ExperimentConfig {
        num_flows: 2,
        error_p: 0.5,
        duration: 10.0,
        ..Default::default()
    };
    let a = run(base.clone());
    let b = run(ExperimentConfig { run: 1, ..base });

    assert!(a.counters.error_drops > 0);
    assert!(b.counters.error_drops > 0);
    let drops = |r: &ExperimentReport| r.links[0].forward.error_drops + r.links[0].reverse.error_drops;
    assert_eq!(drops(&a), a.counters.error_drops);
    let lost = |r: &ExperimentReport| -> Vec<u64> {
        r.flow_stats.values().map(|s| s.lost_packets).collect()
    };
    assert_eq!(lost(&a).len(), lost(&b).len());
    assert_ne!(lost(&a), lost(&b));
    assert_ne!(
        a.trace(Metric::CongestionWindow).unwrap().samples,
        b.trace(Metric::CongestionWindow).unwrap().samples
    );
}

#[test]
fn heavy_loss_keeps_statistics_well_formed() {
    let report = run(ExperimentConfig {
        num_flows: 3,
        error_p: 0.5,
        duration: 10.0,
        ..Default::default()
    });
    for record in report.flow_stats.values() {
        assert!(record.rx_packets <= record.tx_packets);
        assert!((0.0..=100.0).contains(&record.loss_ratio));
        if let Some(bps) = record.throughput_bps {
            assert!(bps.is_finite() && bps >= 0.0);
        }
    }
    assert!(report.sender_report(0).unwrap().retransmissions > 0);
}

#[test]
fn peak_hopper_and_prr_run_end_to_end() {
    let report = run(ExperimentConfig {
        num_flows: 2,
        duration: 6.0,
        transport_prot: "ns3::TcpVegas".to_string(),
        recovery: "TcpPrrRecovery".to_string(),
        peak_hopper: true,
        error_p: 0.01,
        ..Default::default()
    });
    assert_eq!(report.transport.algorithm.name(), "TcpVegas");
    assert_eq!(report.transport.recovery.name(), "TcpPrrRecovery");
    assert!(report.receiver_report(0).unwrap().bytes_received > 0);
}

#[test]
fn report_serializes_to_json() {
    let report = run(ExperimentConfig {
        num_flows: 1,
        duration: 4.0,
        ..Default::default()
    });
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["config"]["num_flows"], 1);
    assert_eq!(json["segment_size"], 340);
    assert!(json["traces"].as_array().unwrap().len() == Metric::ALL.len());
}

#[test]
fn stagger_overflowing_the_clock_is_an_error() {
    // 1e19 s fits in a Duration, but flow 2 would start at 2e19 s
    let config = ExperimentConfig {
        num_flows: 3,
        start_time: 1e19,
        ..single_lossless_flow()
    };
    config.validate().unwrap();
    let result = ExperimentDriver::new(config)
        .with_trace_output(TraceOutput::InMemory)
        .run();
    assert!(matches!(
        result,
        Err(HarnessError::InvalidParameter { field: "start_time", .. })
    ));
}
