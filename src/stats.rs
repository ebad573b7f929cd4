//! Run-time and communication statistics collected at every backend barrier.
//!
//! The protocol core never interprets these numbers, it only passes them on to the caller.
use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Measurements of a single execution barrier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarrierStats {
    /// Name of the barrier, e.g. `"run 1"`.
    pub label: String,
    /// Number of gates evaluated.
    pub gates: usize,
    /// Number of message exchanges with the peer.
    pub rounds: usize,
    /// Bytes sent to the peer and the dealer.
    pub bytes_sent: usize,
    /// Messages sent to the peer and the dealer.
    pub messages_sent: usize,
    /// Wall-clock time spent inside the barrier.
    pub duration: Duration,
}

/// All barriers of one protocol repetition, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepetitionStats {
    /// One entry per barrier.
    pub barriers: Vec<BarrierStats>,
}

impl RepetitionStats {
    /// Total time spent in barriers.
    pub fn duration(&self) -> Duration {
        self.barriers.iter().map(|b| b.duration).sum()
    }

    /// Total number of bytes sent.
    pub fn bytes_sent(&self) -> usize {
        self.barriers.iter().map(|b| b.bytes_sent).sum()
    }
}

/// Sums of [`BarrierStats`] with the same label over several repetitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatedBarrier {
    /// Name of the barrier.
    pub label: String,
    /// Number of repetitions in which the barrier was executed.
    pub count: usize,
    /// Total rounds.
    pub rounds: usize,
    /// Total bytes sent.
    pub bytes_sent: usize,
    /// Total messages sent.
    pub messages_sent: usize,
    /// Total wall-clock time.
    pub duration: Duration,
}

impl AccumulatedBarrier {
    /// Mean wall-clock time per execution.
    pub fn mean_duration(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.duration / n,
        }
    }
}

/// Statistics accumulated over all repetitions of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatedStats {
    /// Number of repetitions added so far.
    pub repetitions: usize,
    /// Per-label sums, in order of first appearance.
    pub barriers: Vec<AccumulatedBarrier>,
}

impl AccumulatedStats {
    /// Adds the statistics of one repetition.
    pub fn add(&mut self, stats: &RepetitionStats) {
        self.repetitions += 1;
        for barrier in &stats.barriers {
            let acc = match self.barriers.iter_mut().position(|a| a.label == barrier.label) {
                Some(i) => &mut self.barriers[i],
                None => {
                    self.barriers.push(AccumulatedBarrier {
                        label: barrier.label.clone(),
                        ..Default::default()
                    });
                    let last = self.barriers.len() - 1;
                    &mut self.barriers[last]
                }
            };
            acc.count += 1;
            acc.rounds += barrier.rounds;
            acc.bytes_sent += barrier.bytes_sent;
            acc.messages_sent += barrier.messages_sent;
            acc.duration += barrier.duration;
        }
    }

    /// Total bytes sent over all repetitions.
    pub fn bytes_sent(&self) -> usize {
        self.barriers.iter().map(|b| b.bytes_sent).sum()
    }
}

impl fmt::Display for AccumulatedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Exact Pattern Matching, {} repetition(s)", self.repetitions)?;
        writeln!(
            f,
            "{:<12} {:>14} {:>8} {:>12} {:>10}",
            "barrier", "mean time", "rounds", "bytes sent", "messages"
        )?;
        for b in &self.barriers {
            writeln!(
                f,
                "{:<12} {:>14} {:>8} {:>12} {:>10}",
                b.label,
                format!("{:.3?}", b.mean_duration()),
                b.rounds,
                b.bytes_sent,
                b.messages_sent
            )?;
        }
        write!(f, "total bytes sent: {}", self.bytes_sent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn barrier(label: &str, millis: u64, bytes: usize) -> BarrierStats {
        BarrierStats {
            label: label.to_string(),
            gates: 1,
            rounds: 1,
            bytes_sent: bytes,
            messages_sent: 2,
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn accumulates_by_label() {
        let mut acc = AccumulatedStats::default();
        acc.add(&RepetitionStats {
            barriers: vec![barrier("run 1", 10, 100), barrier("run 2", 30, 300)],
        });
        acc.add(&RepetitionStats {
            barriers: vec![barrier("run 1", 20, 100), barrier("run 2", 10, 300)],
        });
        assert_eq!(acc.repetitions, 2);
        assert_eq!(acc.barriers.len(), 2);
        assert_eq!(acc.barriers[0].label, "run 1");
        assert_eq!(acc.barriers[0].mean_duration(), Duration::from_millis(15));
        assert_eq!(acc.barriers[1].mean_duration(), Duration::from_millis(20));
        assert_eq!(acc.bytes_sent(), 800);
        assert!(acc.to_string().contains("run 2"));
    }
}
