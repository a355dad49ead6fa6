//! Quality-of-service constraints declared per channel.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LatencyPolicy {
    Strict,
    BestEffort,
}

impl Default for LatencyPolicy {
    fn default() -> Self {
        LatencyPolicy::BestEffort
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Qos {
    pub queue_size: u64,
    pub latency_max: Option<f64>,
    pub frequency_cap: Option<f64>,
    pub latency_policy: LatencyPolicy,
}

impl Default for Qos {
    fn default() -> Self {
        Qos {
            queue_size: 1,
            latency_max: None,
            frequency_cap: None,
            latency_policy: LatencyPolicy::BestEffort,
        }
    }
}
