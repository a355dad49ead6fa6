//! `Solution`: the Solver's output.

use compact_str::CompactString;

use super::Problem;

/// The per-channel outcome of one `Solver::solve` call: the achieved
/// frequency and the packet-by-packet interface schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct SolvedChannel {
    pub name: CompactString,
    /// Achieved Hz (`packets_sent / ΔT`).
    pub frequency: f64,
    /// One entry per packet to send within ΔT; consumed round-robin by the
    /// Switchboard at runtime. May be a compacted repeating prefix.
    pub interfaces: Vec<CompactString>,
}

/// `{ assignments: [SolvedChannel] }`, ordered by decreasing channel
/// priority then declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Solution {
    pub assignments: Vec<SolvedChannel>,
    /// Back-reference to the Problem this Solution was computed from.
    pub problem_name: CompactString,
}

impl Solution {
    pub fn empty_for(problem: &Problem) -> Self {
        Solution {
            assignments: problem
                .channels
                .iter()
                .map(|c| SolvedChannel {
                    name: c.name.clone(),
                    frequency: 0.0,
                    interfaces: Vec::new(),
                })
                .collect(),
            problem_name: problem.name.clone(),
        }
    }

    pub fn channel(&self, name: &str) -> Option<&SolvedChannel> {
        self.assignments.iter().find(|a| a.name == name)
    }
}
