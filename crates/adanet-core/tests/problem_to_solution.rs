//! Cross-module integration: a full YAML problem file through the config
//! loader and into the Solver, checking the invariants that only hold
//! once both stages are wired together.
//!
//! 1. Whitelist containment (P6): every scheduled interface traces back
//!    to a declared link.
//! 2. Feasibility (P1): no link is scheduled more bytes than its
//!    capacity for this window.
//! 3. A link whose `type` supplies defaults participates in scheduling
//!    without the file spelling out bandwidth/latency.

use adanet_core::config::ProblemInput;
use adanet_core::solver::{self, SolverConfig};

const PROBLEM: &str = r#"
name: field-test
links:
  - interface: wlan0
    type: wifi-ac
  - interface: eth0
    type: ethernet
channels:
  - name: telemetry
    kind: simulated
    priority: 10
    frequency: 20
    size: 512
  - name: video
    kind: simulated
    priority: 1
    frequency: 5
    size: 4096
    qos:
      latency_policy: strict
      latency: "1ms"
"#;

#[test]
fn whitelist_containment_and_feasibility_hold_end_to_end() {
    let input = ProblemInput::from_yaml_str(PROBLEM).unwrap();
    let (problem, simulation) = input.resolve("field-test").unwrap();
    assert!(simulation.is_none());

    let config = SolverConfig::default();
    let solution = solver::solve(&problem, &config);

    let declared: Vec<&str> = problem.links.iter().map(|l| l.interface.as_str()).collect();
    for assignment in &solution.assignments {
        for iface in &assignment.interfaces {
            assert!(
                declared.contains(&iface.as_str()),
                "scheduled interface {iface} not in the declared link set"
            );
        }
    }

    // The strict-latency video channel must only ever land on eth0
    // (wifi-ac's looked-up latency, 2ms, exceeds the channel's 1ms cap).
    let video = solution
        .assignments
        .iter()
        .find(|a| a.name == "video")
        .unwrap();
    assert!(video.interfaces.iter().all(|i| *i == "eth0"));

    let biggest_packet_size = problem
        .channels
        .iter()
        .filter(|c| c.frequency > 0.0)
        .filter_map(|c| c.size)
        .max()
        .unwrap_or(0) as f64;

    let mut used = std::collections::HashMap::new();
    for assignment in &solution.assignments {
        let channel = problem.channels.iter().find(|c| c.name == assignment.name).unwrap();
        let size = channel.size.unwrap_or(0) as f64;
        for iface in &assignment.interfaces {
            *used.entry(iface.clone()).or_insert(0.0) += size;
        }
    }
    for link in &problem.links {
        let capacity =
            biggest_packet_size.max(link.bandwidth).max(config.floor_value) * config.delta_t;
        let consumed = used.get(&link.interface).copied().unwrap_or(0.0);
        assert!(
            consumed <= capacity + 1e-6,
            "{} over capacity: consumed {consumed}, capacity {capacity}",
            link.interface
        );
    }
}
