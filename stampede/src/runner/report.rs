//! Run summaries.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::phase::{PhaseInstance, PhaseStatus};
use crate::stats::PhaseStatistics;

/// Outcome of one phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    /// Phase name.
    pub name: String,
    /// Status when the report was taken.
    pub status: PhaseStatus,
    /// Whether the phase was a warmup.
    pub is_warmup: bool,
    /// Iteration number of the definition.
    pub iteration: u32,
    /// Start relative to the beginning of the run, if it started.
    #[serde(with = "crate::config::millis::option")]
    pub started_at: Option<Duration>,
    /// Whether the phase ever found its pool empty.
    pub session_limit_exceeded: bool,
    /// Arrivals still waiting for a session.
    pub throttled_users: usize,
    /// Most arrivals waiting at once.
    pub peak_throttled_users: usize,
    /// First error recorded on the phase.
    pub error: Option<String>,
    /// Fewest sessions of the resource group in use.
    pub min_used_sessions: usize,
    /// Most sessions of the resource group in use.
    pub max_used_sessions: usize,
}

impl PhaseReport {
    pub(crate) fn new(phase: &PhaseInstance, run_start: Option<Duration>) -> Self {
        let pool = phase.resources().pool();
        Self {
            name: phase.name().to_string(),
            status: phase.status(),
            is_warmup: phase.definition().is_warmup,
            iteration: phase.definition().iteration,
            started_at: phase
                .absolute_start()
                .map(|start| start.saturating_sub(run_start.unwrap_or_default())),
            session_limit_exceeded: phase.session_limit_exceeded(),
            throttled_users: phase.throttled_users(),
            peak_throttled_users: phase.peak_throttled_users(),
            error: phase.error().map(|e| e.to_string()),
            min_used_sessions: pool.min_used(),
            max_used_sessions: pool.max_used(),
        }
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Benchmark name.
    pub benchmark: String,
    /// Time from the first runner tick to the report.
    #[serde(with = "crate::config::millis")]
    pub elapsed: Duration,
    /// One entry per phase, in declaration order.
    pub phases: Vec<PhaseReport>,
    /// Counters recorded by sessions.
    pub statistics: Vec<PhaseStatistics>,
    /// Abort reason, if the run was aborted.
    pub aborted: Option<String>,
}

impl RunReport {
    /// Look up a phase by name.
    pub fn phase(&self, name: &str) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// No abort and no phase error.
    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.phases.iter().all(|p| p.error.is_none())
    }
}

fn fmt_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms < 1000 {
        format!("{}ms", total_ms)
    } else if total_ms < 60_000 {
        format!("{:.2}s", d.as_secs_f64())
    } else {
        let mins = d.as_secs() / 60;
        let secs = d.as_secs() % 60;
        format!("{}m {:02}s", mins, secs)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Benchmark Report: {} ===", self.benchmark)?;
        writeln!(f, "Elapsed: {}", fmt_duration(self.elapsed))?;
        writeln!(f, "Phases: {}", self.phases.len())?;
        if let Some(reason) = &self.aborted {
            writeln!(f, "Aborted: {}", reason)?;
        }

        for phase in &self.phases {
            writeln!(f)?;
            let warmup = if phase.is_warmup { " (warmup)" } else { "" };
            writeln!(f, "--- {}{} [{}] ---", phase.name, warmup, phase.status)?;
            match phase.started_at {
                Some(at) => writeln!(f, "Started at: +{}", fmt_duration(at))?,
                None => writeln!(f, "Started at: never")?,
            }
            writeln!(
                f,
                "Sessions used: {}..{}",
                phase.min_used_sessions, phase.max_used_sessions
            )?;
            if phase.session_limit_exceeded {
                writeln!(
                    f,
                    "Session limit exceeded (peak throttled: {}, still throttled: {})",
                    phase.peak_throttled_users, phase.throttled_users
                )?;
            }
            if let Some(error) = &phase.error {
                writeln!(f, "Error: {}", error)?;
            }
        }

        if !self.statistics.is_empty() {
            writeln!(f)?;
            writeln!(f, "=== Statistics ===")?;
            for entry in &self.statistics {
                let s = &entry.snapshot;
                write!(
                    f,
                    "{}/{}: {} requests, {} responses, {} errors",
                    entry.phase, entry.metric, s.requests, s.responses, s.errors
                )?;
                if let Some(mean) = s.mean_latency_ns {
                    write!(f, ", mean {}", fmt_duration(Duration::from_nanos(mean)))?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatisticsSnapshot;

    fn report() -> RunReport {
        RunReport {
            benchmark: "checkout".to_string(),
            elapsed: Duration::from_millis(61_500),
            phases: vec![PhaseReport {
                name: "steady".to_string(),
                status: PhaseStatus::StatsComplete,
                is_warmup: false,
                iteration: 0,
                started_at: Some(Duration::from_millis(250)),
                session_limit_exceeded: true,
                throttled_users: 0,
                peak_throttled_users: 7,
                error: None,
                min_used_sessions: 0,
                max_used_sessions: 2,
            }],
            statistics: vec![PhaseStatistics {
                phase: "steady".to_string(),
                metric: "http".to_string(),
                snapshot: StatisticsSnapshot {
                    requests: 3,
                    responses: 3,
                    errors: 0,
                    min_latency_ns: Some(1_000_000),
                    max_latency_ns: Some(3_000_000),
                    mean_latency_ns: Some(2_000_000),
                },
            }],
            aborted: None,
        }
    }

    #[test]
    fn test_display() {
        let text = report().to_string();
        assert!(text.contains("=== Benchmark Report: checkout ==="));
        assert!(text.contains("Elapsed: 1m 01s"));
        assert!(text.contains("--- steady [STATS_COMPLETE] ---"));
        assert!(text.contains("Started at: +250ms"));
        assert!(text.contains("peak throttled: 7"));
        assert!(text.contains("steady/http: 3 requests, 3 responses, 0 errors, mean 2ms"));
    }

    #[test]
    fn test_success_and_json() {
        let mut report = report();
        assert!(report.is_success());
        assert_eq!(report.phase("steady").map(|p| p.max_used_sessions), Some(2));

        let json = serde_json::to_value(&report).expect("serializable");
        assert_eq!(json["elapsed"], 61_500);
        assert_eq!(json["phases"][0]["startedAt"], 250);
        assert_eq!(json["phases"][0]["status"], "STATS_COMPLETE");

        report.phases[0].error = Some("step failed: boom".to_string());
        assert!(!report.is_success());
    }
}
