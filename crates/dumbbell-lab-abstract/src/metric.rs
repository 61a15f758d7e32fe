use serde::{Deserialize, Serialize};
use std::fmt;

/// Socket state variables that can be traced as time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CongestionWindow,
    SlowStartThreshold,
    Rtt,
    Rto,
    RtoOverRtt,
    MeanRetransmission,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::CongestionWindow,
        Metric::SlowStartThreshold,
        Metric::Rtt,
        Metric::Rto,
        Metric::RtoOverRtt,
        Metric::MeanRetransmission,
    ];

    /// Output file name, appended to the run's prefix.
    pub fn file_name(&self) -> &'static str {
        match self {
            Metric::CongestionWindow => "cwnd.data",
            Metric::SlowStartThreshold => "ssth.data",
            Metric::Rtt => "rtt.data",
            Metric::Rto => "rto.data",
            Metric::RtoOverRtt => "rto_by_rtt.data",
            Metric::MeanRetransmission => "mean_retransmission.data",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::CongestionWindow => "cwnd",
            Metric::SlowStartThreshold => "ssthresh",
            Metric::Rtt => "rtt",
            Metric::Rto => "rto",
            Metric::RtoOverRtt => "rto_over_rtt",
            Metric::MeanRetransmission => "mean_retransmission",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Dense per-metric storage indexed by [`Metric`].
#[derive(Debug, Clone)]
pub struct MetricMap<T> {
    slots: [Option<T>; 6],
}

impl<T> Default for MetricMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MetricMap<T> {
    pub fn new() -> Self {
        Self {
            slots: [None, None, None, None, None, None],
        }
    }

    pub fn insert(&mut self, metric: Metric, value: T) -> Option<T> {
        self.slots[metric.index()].replace(value)
    }

    pub fn get(&self, metric: Metric) -> Option<&T> {
        self.slots[metric.index()].as_ref()
    }

    pub fn get_mut(&mut self, metric: Metric) -> Option<&mut T> {
        self.slots[metric.index()].as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, &T)> {
        Metric::ALL
            .iter()
            .filter_map(|m| self.get(*m).map(|v| (*m, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.as_mut())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_distinct() {
        let mut names: Vec<_> = Metric::ALL.iter().map(|m| m.file_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Metric::ALL.len());
    }

    #[test]
    fn map_keeps_metrics_apart() {
        let mut map = MetricMap::new();
        map.insert(Metric::Rtt, 1);
        map.insert(Metric::Rto, 2);
        assert_eq!(map.get(Metric::Rtt), Some(&1));
        assert_eq!(map.get(Metric::CongestionWindow), None);
        assert_eq!(map.len(), 2);
        let order: Vec<_> = map.iter().map(|(m, _)| m).collect();
        assert_eq!(order, vec![Metric::Rtt, Metric::Rto]);
    }
}
