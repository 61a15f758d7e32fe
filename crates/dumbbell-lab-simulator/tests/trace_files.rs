use dumbbell_lab_abstract::{ExperimentConfig, Metric};
use dumbbell_lab_simulator::{ExperimentDriver, TraceOutput};
use std::fs;

#[test]
fn traces_land_in_prefixed_files() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = format!("{}/westwood-", dir.path().display());
    let config = ExperimentConfig {
        num_flows: 2,
        duration: 4.0,
        prefix_file_name: prefix.clone(),
        ..Default::default()
    };
    let report = ExperimentDriver::new(config).run().unwrap();

    for metric in Metric::ALL {
        let path = format!("{prefix}{}", metric.file_name());
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        let series = report.trace(metric).unwrap();
        assert_eq!(lines.len() as u64, series.recorded, "{path}");
        assert!(series.samples.is_empty());
        if lines.is_empty() {
            // a value that never changed leaves its file empty
            assert_ne!(metric, Metric::CongestionWindow);
            continue;
        }
        assert!(lines[0].starts_with("0 "), "{path}: {}", lines[0]);
        for line in &lines {
            let mut fields = line.split(' ');
            let time: f64 = fields.next().unwrap().parse().unwrap();
            let _value: f64 = fields.next().unwrap().parse().unwrap();
            assert!(fields.next().is_none());
            assert!((0.0..=4.0).contains(&time));
        }
    }

    let ascii = fs::read_to_string(format!("{prefix}-ascii")).unwrap();
    assert!(ascii.lines().any(|l| l.starts_with("+ ")));
    assert!(ascii.lines().any(|l| l.starts_with("r ")));
}

#[test]
fn in_memory_output_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = format!("{}/quiet-", dir.path().display());
    let config = ExperimentConfig {
        num_flows: 1,
        duration: 3.0,
        prefix_file_name: prefix,
        ..Default::default()
    };
    let report = ExperimentDriver::new(config)
        .with_trace_output(TraceOutput::InMemory)
        .run()
        .unwrap();
    assert!(!report.traces.is_empty());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn unwritable_prefix_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = format!("{}/missing/dir/x-", dir.path().display());
    let config = ExperimentConfig {
        num_flows: 1,
        duration: 3.0,
        prefix_file_name: prefix,
        ..Default::default()
    };
    let err = ExperimentDriver::new(config).run().unwrap_err();
    assert_eq!(err.kind(), dumbbell_lab_abstract::ErrorKind::Io);
}
