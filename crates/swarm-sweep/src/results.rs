//! Measurements scraped from worker output, and the shared result log.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use regex::Regex;
use serde::Serialize;

use swarm_core::Strategy;

/// A mean and its confidence interval, as printed by the benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measurement {
    pub mean: f64,
    pub conf: f64,
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} +-{:.6}", self.mean, self.conf)
    }
}

/// Matches `<label>: <mean> +-<conf>` anywhere in a line.
#[derive(Debug, Clone)]
pub struct MetricPattern {
    label: String,
    re: Regex,
}

const NUMBER: &str = r"[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?";

impl MetricPattern {
    pub fn new(label: impl Into<String>) -> Result<Self, regex::Error> {
        let label = label.into();
        let re = Regex::new(&format!(
            r"{}:\s*({NUMBER})\s*\+-\s*({NUMBER})",
            regex::escape(&label)
        ))?;
        Ok(Self { label, re })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn scrape_line(&self, line: &str) -> Option<Measurement> {
        let caps = self.re.captures(line)?;
        let mean = caps.get(1)?.as_str().parse().ok()?;
        let conf = caps.get(2)?.as_str().parse().ok()?;
        Some(Measurement { mean, conf })
    }

    /// First matching line wins.
    pub fn scrape<'a>(&self, lines: impl IntoIterator<Item = &'a str>) -> Option<Measurement> {
        lines.into_iter().find_map(|l| self.scrape_line(l))
    }
}

/// One finished experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentRecord {
    pub partition: Vec<usize>,
    pub strategy: Strategy,
    pub result: Measurement,
}

impl fmt::Display for ExperimentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {}", self.strategy, self.partition, self.result)
    }
}

/// Append-only log shared by all experiment tasks.
#[derive(Debug, Default)]
pub struct ResultLog {
    records: Mutex<Vec<ExperimentRecord>>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Vec<ExperimentRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a record and return how many the log now holds.
    pub fn append(&self, record: ExperimentRecord) -> usize {
        let mut records = self.records();
        records.push(record);
        records.len()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn snapshot(&self) -> Vec<ExperimentRecord> {
        self.records().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern() -> MetricPattern {
        MetricPattern::new("Img/sec per /gpu:0").unwrap()
    }

    #[test]
    fn scrapes_benchmark_line() {
        let m = pattern().scrape_line("Img/sec per /gpu:0: 123.4 +-5.6").unwrap();
        assert_eq!(m, Measurement { mean: 123.4, conf: 5.6 });
    }

    #[test]
    fn scrapes_line_with_prefix_and_integers() {
        let m = pattern()
            .scrape_line("[1@10.0.0.2:10000] Img/sec per /gpu:0: 98 +- 2")
            .unwrap();
        assert_eq!(m, Measurement { mean: 98.0, conf: 2.0 });
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        let p = pattern();
        assert_eq!(p.scrape_line("Img/sec per /gpu:1: 1.0 +-1.0"), None);
        assert_eq!(p.scrape_line("step 10 loss 0.3"), None);
        let lines = ["warming up", "Img/sec per /gpu:0: 10.5 +-0.5", "Img/sec per /gpu:0: 99 +-9"];
        assert_eq!(p.scrape(lines), Some(Measurement { mean: 10.5, conf: 0.5 }));
    }

    #[test]
    fn label_is_matched_literally() {
        let p = MetricPattern::new("a.b").unwrap();
        assert!(p.scrape_line("a.b: 1 +-1").is_some());
        assert!(p.scrape_line("axb: 1 +-1").is_none());
    }

    #[test]
    fn record_display() {
        let r = ExperimentRecord {
            partition: vec![2, 2],
            strategy: Strategy::Ring,
            result: Measurement { mean: 123.4, conf: 5.6 },
        };
        assert_eq!(r.to_string(), "RING [2, 2] 123.400000 +-5.600000");
    }

    #[test]
    fn log_counts_appends() {
        let log = ResultLog::new();
        assert!(log.is_empty());
        let r = ExperimentRecord {
            partition: vec![1],
            strategy: Strategy::Simple,
            result: Measurement { mean: 1.0, conf: 0.0 },
        };
        assert_eq!(log.append(r.clone()), 1);
        assert_eq!(log.append(r), 2);
        assert_eq!(log.snapshot().len(), 2);
    }
}
