//! Time series of one sender's traced state, one [`MetricSeries`] per metric.

use dumbbell_lab_abstract::{HarnessError, Metric, MetricMap, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::engine::AppId;
use crate::scheduler::FlowHandle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSample {
    pub time: Duration,
    pub value: f64,
}

/// Where armed series write their samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOutput {
    InMemory,
    /// One file per metric, `<prefix><file name>`.
    Files { prefix: String },
}

impl TraceOutput {
    pub fn path_for(&self, metric: Metric) -> Option<PathBuf> {
        match self {
            TraceOutput::InMemory => None,
            TraceOutput::Files { prefix } => Some(PathBuf::from(format!("{prefix}{}", metric.file_name()))),
        }
    }
}

struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

pub struct MetricSeries {
    metric: Metric,
    has_emitted_first_sample: bool,
    recorded: u64,
    /// Kept only when there is no file sink.
    samples: Vec<MetricSample>,
    sink: Option<FileSink>,
    /// First write failure; reported by `finish` so the event loop never stops for I/O.
    write_error: Option<HarnessError>,
}

impl MetricSeries {
    pub fn in_memory(metric: Metric) -> Self {
        Self {
            metric,
            has_emitted_first_sample: false,
            recorded: 0,
            samples: Vec::new(),
            sink: None,
            write_error: None,
        }
    }

    pub fn to_file(metric: Metric, path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| HarnessError::io(path, e))?;
        let mut series = Self::in_memory(metric);
        series.sink = Some(FileSink {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        });
        Ok(series)
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// In-memory samples; empty for a file-backed series.
    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    /// Samples appended so far, whatever their destination.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    pub fn has_emitted_first_sample(&self) -> bool {
        self.has_emitted_first_sample
    }

    /// The first change also records the value held before it, at time zero.
    pub fn on_change(&mut self, now: Duration, old: f64, new: f64) {
        if !self.has_emitted_first_sample {
            self.has_emitted_first_sample = true;
            self.append(Duration::ZERO, old);
        }
        self.append(now, new);
    }

    fn append(&mut self, time: Duration, value: f64) {
        self.recorded += 1;
        let Some(sink) = &mut self.sink else {
            self.samples.push(MetricSample { time, value });
            return;
        };
        if self.write_error.is_some() {
            return;
        }
        if let Err(e) = writeln!(sink.writer, "{} {}", time.as_secs_f64(), value) {
            self.write_error = Some(HarnessError::io(&sink.path, e));
        }
    }

    pub fn finish(&mut self) -> Result<()> {
        if let Some(err) = self.write_error.take() {
            return Err(err);
        }
        if let Some(sink) = &mut self.sink {
            sink.writer
                .flush()
                .map_err(|e| HarnessError::io(&sink.path, e))?;
        }
        Ok(())
    }
}

/// Records the traced state of exactly one flow's sender.
pub struct MetricsTracer {
    target_flow: usize,
    target_app: AppId,
    series: MetricMap<MetricSeries>,
}

impl MetricsTracer {
    /// Arm on flow `target`. Fails when there is no such flow or when it can never
    /// become active, since an empty series would look like an untraced run.
    pub fn arm(
        flows: &[FlowHandle],
        target: usize,
        metrics: &[Metric],
        output: &TraceOutput,
    ) -> Result<Self> {
        let handle = flows
            .get(target)
            .filter(|handle| handle.is_active())
            .ok_or(HarnessError::TraceTargetMissing { flow: target })?;

        let mut series = MetricMap::new();
        for &metric in metrics {
            let s = match output.path_for(metric) {
                Some(path) => MetricSeries::to_file(metric, &path)?,
                None => MetricSeries::in_memory(metric),
            };
            series.insert(metric, s);
        }
        info!(flow = target, metrics = series.len(), "tracer armed");

        Ok(Self {
            target_flow: target,
            target_app: handle.sender,
            series,
        })
    }

    pub fn target_flow(&self) -> usize {
        self.target_flow
    }

    pub fn target_app(&self) -> AppId {
        self.target_app
    }

    pub fn record(&mut self, metric: Metric, now: Duration, old: f64, new: f64) {
        if let Some(series) = self.series.get_mut(metric) {
            debug!(%metric, old, new, "traced value changed");
            series.on_change(now, old, new);
        }
    }

    pub fn series(&self, metric: Metric) -> Option<&MetricSeries> {
        self.series.get(metric)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, &MetricSeries)> {
        self.series.iter()
    }

    /// Flush every sink; reports the first failure after trying them all.
    pub fn finish(&mut self) -> Result<()> {
        let mut first_err = None;
        for series in self.series.iter_mut() {
            if let Err(e) = series.finish() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
