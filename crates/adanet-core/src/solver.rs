//! The Allocator: a deterministic, priority-preserving greedy bandwidth
//! scheduler. `solve` is a pure function of its `Problem` and
//! `SolverConfig`; it never reads the clock or any other external state.

use compact_str::CompactString;

use crate::config::IFACE_MIN_BANDWIDTH_BYTES_SEC;
use crate::types::{LatencyPolicy, Problem, Solution, SolvedChannel};

/// Tunables that do not come from the problem file itself.
#[derive(Debug, Clone, Copy)]
pub struct SolverConfig {
    /// Planning window, in seconds. Default 4s per the problem format.
    pub delta_t: f64,
    /// Floor under `max(biggest_packet_size, L.bandwidth)` when deriving
    /// `L.capacity`, guarding against a transient `bandwidth=0` reading
    /// trapping the solver. Must cover at least one packet of the largest
    /// active channel.
    pub floor_value: f64,
    /// When true, compact each channel's schedule to its shortest
    /// repeating prefix before returning (step 8).
    pub compact: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            delta_t: 4.0,
            floor_value: IFACE_MIN_BANDWIDTH_BYTES_SEC,
            compact: true,
        }
    }
}

struct ScratchLink {
    interface: CompactString,
    latency: f64,
    capacity: f64,
    budget: Option<f64>,
}

/// Solve `problem` for one planning window, producing the Solution
/// Switchboard should adopt.
pub fn solve(problem: &Problem, config: &SolverConfig) -> Solution {
    if problem.links.is_empty() {
        return Solution::empty_for(problem);
    }

    let biggest_packet_size = problem
        .channels
        .iter()
        .filter(|c| c.frequency > 0.0)
        .filter_map(|c| c.size)
        .max()
        .unwrap_or(0) as f64;

    // Per-link working copies (SimpleSolver's deep-copy-before-mutate
    // discipline): the Problem's links are never mutated in place.
    let mut scratch: Vec<ScratchLink> = problem
        .links
        .iter()
        .map(|link| {
            let raw_capacity = biggest_packet_size
                .max(link.bandwidth)
                .max(config.floor_value)
                * config.delta_t;
            let capacity = match link.budget {
                Some(b) => raw_capacity.min(b),
                None => raw_capacity,
            };
            ScratchLink {
                interface: link.interface.clone(),
                latency: link.latency,
                capacity,
                budget: link.budget,
            }
        })
        .collect();
    scratch.sort_by(|a, b| a.latency.partial_cmp(&b.latency).unwrap());

    // Group by descending priority; stable sort preserves declaration order
    // within a priority class.
    let mut channel_order: Vec<usize> = (0..problem.channels.len()).collect();
    channel_order.sort_by(|&a, &b| {
        problem.channels[b]
            .priority
            .cmp(&problem.channels[a].priority)
    });

    let mut assignments = Vec::with_capacity(problem.channels.len());

    for &idx in &channel_order {
        let channel = &problem.channels[idx];
        let demand_freq = channel.qos.frequency_cap.unwrap_or(channel.frequency);
        let packets_total =
            channel.queue_length + (demand_freq * config.delta_t).ceil().max(0.0) as u64;
        let packet_size = channel.size.unwrap_or(0) as f64;

        let good_idx: Vec<usize> = (0..scratch.len())
            .filter(|&i| match channel.qos.latency_max {
                Some(max) => scratch[i].latency <= max,
                None => true,
            })
            .collect();
        let slow_idx: Vec<usize> = (0..scratch.len())
            .filter(|i| !good_idx.contains(i))
            .collect();

        let mut schedule: Vec<CompactString> = Vec::new();
        let mut packets_sent: u64 = 0;

        if packets_total > 0 && !scratch.is_empty() {
            // Every attempt either admits a packet or permanently drops a
            // link from the pool (capacity/budget only shrink, so a link
            // that can't take this channel's packet size now never will
            // again this solve). At most `scratch.len()` attempts are ever
            // wasted that way, across both the good and slow pools.
            let max_attempts = packets_total + scratch.len() as u64 + 2;

            let mut pool: Vec<usize> = good_idx.clone();
            let mut cursor = 0usize;
            let mut used_slow = false;
            let mut attempts = 0u64;

            'outer: while packets_sent < packets_total && attempts < max_attempts.max(1) {
                if pool.is_empty() {
                    if !used_slow && channel.qos.latency_policy == LatencyPolicy::BestEffort {
                        pool = slow_idx.clone();
                        cursor = 0;
                        used_slow = true;
                        if pool.is_empty() {
                            break 'outer;
                        }
                        continue;
                    } else {
                        break 'outer;
                    }
                }

                attempts += 1;
                let pos = cursor % pool.len();
                let link_idx = pool[pos];
                let link = &mut scratch[link_idx];
                let budget_ok = link.budget.map(|b| b >= packet_size).unwrap_or(true);
                if budget_ok && link.capacity >= packet_size {
                    if let Some(b) = link.budget.as_mut() {
                        *b -= packet_size;
                    }
                    link.capacity -= packet_size;
                    schedule.push(link.interface.clone());
                    packets_sent += 1;
                    cursor = pos + 1;
                    if packets_sent >= packets_total {
                        break 'outer;
                    }
                } else {
                    // Exhausted for this channel's packet size: drop it so
                    // later sweeps don't keep rechecking a dead link.
                    pool.remove(pos);
                    if !pool.is_empty() {
                        cursor = pos % pool.len();
                    }
                }
            }
        }

        let achieved_frequency = packets_sent as f64 / config.delta_t;
        let interfaces = if config.compact {
            compact_schedule(&schedule)
        } else {
            schedule
        };

        assignments.push(SolvedChannel {
            name: channel.name.clone(),
            frequency: achieved_frequency,
            interfaces,
        });
    }

    Solution {
        assignments,
        problem_name: problem.name.clone(),
    }
}

/// Replace `schedule` with its shortest repeating prefix, if repeating that
/// prefix reproduces the original list exactly (step 8; only emitted when
/// `len % prefix_len == 0` and the divisibility round-trips).
fn compact_schedule(schedule: &[CompactString]) -> Vec<CompactString> {
    let n = schedule.len();
    if n == 0 {
        return Vec::new();
    }
    for period in 1..=n {
        if n % period != 0 {
            continue;
        }
        if schedule
            .iter()
            .enumerate()
            .all(|(i, iface)| *iface == schedule[i % period])
        {
            return schedule[..period].to_vec();
        }
    }
    schedule.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, ChannelKind, Link, Qos};

    fn link(name: &str, bandwidth: f64, latency: f64) -> Link {
        Link {
            interface: name.into(),
            link_type: None,
            server: None,
            bandwidth,
            latency,
            reliability: 1.0,
            budget: None,
            capacity: 0.0,
        }
    }

    fn channel(name: &str, priority: i32, frequency: f64, size: u64) -> Channel {
        Channel {
            name: name.into(),
            kind: ChannelKind::Simulated,
            priority,
            frequency,
            size: Some(size),
            qos: Qos::default(),
            queue_length: 0,
        }
    }

    #[test]
    fn no_links_yields_empty_assignments() {
        let mut problem = Problem::new("p");
        problem.channels.push(channel("c", 0, 10.0, 100));
        let sol = solve(&problem, &SolverConfig::default());
        assert_eq!(sol.assignments.len(), 1);
        assert_eq!(sol.assignments[0].frequency, 0.0);
        assert!(sol.assignments[0].interfaces.is_empty());
    }

    #[test]
    fn no_channels_yields_empty_assignments() {
        let mut problem = Problem::new("p");
        problem.links.push(link("wlan0", 1_000_000.0, 0.01));
        let sol = solve(&problem, &SolverConfig::default());
        assert!(sol.assignments.is_empty());
    }

    #[test]
    fn one_link_two_channels_compacts_to_single_interface() {
        let mut problem = Problem::new("p");
        problem.links.push(link("wlan0", 10_000_000.0, 0.01));
        problem.channels.push(channel("a", 1, 5.0, 100));
        problem.channels.push(channel("b", 0, 5.0, 100));
        let sol = solve(&problem, &SolverConfig::default());
        for a in &sol.assignments {
            assert_eq!(a.interfaces, vec![CompactString::from("wlan0")]);
            assert!((a.frequency - 5.0).abs() < 1e-6);
        }
    }

    #[test]
    fn two_equal_links_alternate() {
        let mut problem = Problem::new("p");
        problem.links.push(link("wlan0", 10_000_000.0, 0.01));
        problem.links.push(link("wlan1", 10_000_000.0, 0.01));
        problem.channels.push(channel("a", 0, 10.0, 100));
        let sol = solve(&problem, &SolverConfig::default());
        let schedule = &sol.assignments[0].interfaces;
        assert_eq!(schedule.len(), 2);
        assert!((sol.assignments[0].frequency - 10.0).abs() < 1e-6);
    }

    #[test]
    fn metered_link_drains_first_then_overflows() {
        let mut problem = Problem::new("p");
        let mut metered = link("wlan0", 10_000_000.0, 0.01);
        metered.budget = Some(1000.0); // room for 10 packets of size 100
        problem.links.push(metered);
        problem.links.push(link("wlan1", 10_000_000.0, 0.02));
        let mut ch = channel("a", 1, 50.0, 100);
        ch.priority = 1;
        problem.channels.push(ch);
        problem
            .channels
            .push(channel("b", 0, 10.0, 100));

        let sol = solve(&problem, &SolverConfig::default());
        let a = sol.channel("a").unwrap();
        let wlan0_count = a.interfaces.iter().filter(|i| *i == "wlan0").count();
        assert!(wlan0_count <= 10);
        // wlan1 is unmetered, so the channel's nominal frequency must still
        // be met once wlan0's budget is exhausted, not starved by wasted
        // rechecks against the drained link.
        assert!((a.frequency - 50.0).abs() < 1e-6);
    }

    #[test]
    fn priority_drains_metered_budget_regardless_of_declaration_order() {
        let mut problem = Problem::new("p");
        let mut metered = link("wlan0", 10_000_000.0, 0.01);
        metered.budget = Some(1000.0);
        problem.links.push(metered);
        problem.links.push(link("wlan1", 10_000_000.0, 0.02));

        // Declare the low-priority channel first; the high-priority one
        // must still be processed first and consume the metered budget.
        problem.channels.push(channel("low", 0, 50.0, 100));
        problem.channels.push(channel("high", 5, 50.0, 100));

        let sol = solve(&problem, &SolverConfig::default());
        assert_eq!(sol.assignments[0].name, "high");
        let high_wlan0 = sol
            .channel("high")
            .unwrap()
            .interfaces
            .iter()
            .filter(|i| *i == "wlan0")
            .count();
        assert!(high_wlan0 > 0);
    }

    #[test]
    fn strict_policy_drops_packets_with_no_fast_link() {
        let mut problem = Problem::new("p");
        problem.links.push(link("slow", 10_000_000.0, 1.0));
        let mut ch = channel("a", 0, 10.0, 100);
        ch.qos.latency_max = Some(0.01);
        ch.qos.latency_policy = LatencyPolicy::Strict;
        problem.channels.push(ch);
        let sol = solve(&problem, &SolverConfig::default());
        assert!(sol.assignments[0].interfaces.is_empty());
        assert_eq!(sol.assignments[0].frequency, 0.0);
    }

    #[test]
    fn determinism() {
        let mut problem = Problem::new("p");
        problem.links.push(link("wlan0", 2_000_000.0, 0.01));
        problem.links.push(link("wlan1", 1_000_000.0, 0.02));
        problem.channels.push(channel("a", 2, 20.0, 150));
        problem.channels.push(channel("b", 1, 5.0, 50));
        let cfg = SolverConfig::default();
        let s1 = solve(&problem, &cfg);
        let s2 = solve(&problem, &cfg);
        assert_eq!(s1, s2);
    }

    #[test]
    fn compaction_round_trips() {
        let schedule: Vec<CompactString> = vec!["a".into(), "b".into(), "a".into(), "b".into()];
        let compacted = compact_schedule(&schedule);
        assert_eq!(compacted, vec![CompactString::from("a"), CompactString::from("b")]);
        let repeated: Vec<CompactString> = compacted
            .iter()
            .cycle()
            .take(schedule.len())
            .cloned()
            .collect();
        assert_eq!(repeated, schedule);
    }
}
