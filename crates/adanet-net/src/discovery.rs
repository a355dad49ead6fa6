//! Peer discovery: announces `(interface, ip, port, role, process-key)` via
//! mDNS and observes the counterpart role's announcements, matching by IPv4
//! network membership.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ipnet::Ipv4Net;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use adanet_core::shutdown::ShutdownHandle;

use crate::adapter::AgentRole;
use crate::error::{Error, Result};

/// Service-type string all AdaNet processes announce under.
pub const ZEROCONF_PREFIX: &str = "_adanet._tcp.local.";

/// One observed or locally announced peer-discovery record.
#[derive(Debug, Clone)]
pub struct NetworkPeerService {
    pub role: AgentRole,
    pub process_key: String,
    pub iface: String,
    pub address: Ipv4Addr,
    pub network: Ipv4Net,
    pub port: u16,
}

/// Matches a remote advertisement to `local_ip`'s network by IPv4 network
/// membership (e.g. both addresses inside the same `/24`).
pub fn network_matches(remote: &NetworkPeerService, local_ip: Ipv4Addr) -> bool {
    remote.network.contains(&local_ip)
}

/// Announce-and-observe handle wrapping `mdns-sd`'s `ServiceDaemon`.
pub struct PeerDiscovery {
    daemon: ServiceDaemon,
    process_key: String,
    observed: Arc<Mutex<Vec<NetworkPeerService>>>,
}

impl PeerDiscovery {
    pub fn new(process_key: impl Into<String>) -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))?;
        Ok(PeerDiscovery {
            daemon,
            process_key: process_key.into(),
            observed: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Announce this process's presence on `iface`. Role collisions with an
    /// existing service name are resolved by the daemon itself (registering
    /// under the same instance name updates the existing record).
    pub fn announce(
        &self,
        role: AgentRole,
        iface: &str,
        address: Ipv4Addr,
        network: Ipv4Net,
        port: u16,
    ) -> Result<()> {
        let role_str = match role {
            AgentRole::Source => "source",
            AgentRole::Sink => "sink",
        };
        let instance_name = format!("{}-{}-{}", role_str, self.process_key, iface);
        let properties = [
            ("role", role_str),
            ("process_key", self.process_key.as_str()),
            ("iface", iface),
            ("network", &network.to_string()),
        ];

        let info = ServiceInfo::new(
            ZEROCONF_PREFIX,
            &instance_name,
            &format!("{instance_name}.local."),
            address,
            port,
            &properties[..],
        )
        .map_err(|e| Error::Discovery(e.to_string()))?;

        self.daemon
            .register(info)
            .map_err(|e| Error::Discovery(e.to_string()))
    }

    /// Spawn a background thread that observes `ZEROCONF_PREFIX`, filters out
    /// own-process and same-role announcements, and appends matches to the
    /// observed list.
    pub fn spawn_observer(&self, own_role: AgentRole, handle: ShutdownHandle) -> Result<()> {
        let receiver = self
            .daemon
            .browse(ZEROCONF_PREFIX)
            .map_err(|e| Error::Discovery(e.to_string()))?;
        let process_key = self.process_key.clone();
        let observed = self.observed.clone();

        std::thread::spawn(move || {
            while !handle.should_stop() {
                match receiver.recv_timeout(Duration::from_millis(500)) {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        if let Some(peer) = parse_service(&info, &process_key, own_role) {
                            let mut guard = observed.lock().unwrap();
                            if let Some(existing) =
                                guard.iter_mut().find(|p| p.iface == peer.iface && p.role == peer.role)
                            {
                                *existing = peer;
                            } else {
                                guard.push(peer);
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(_) => continue,
                }
            }
        });
        Ok(())
    }

    /// Snapshot of every currently observed complementary-role peer.
    pub fn observed(&self) -> Vec<NetworkPeerService> {
        self.observed.lock().unwrap().clone()
    }
}

fn parse_service(
    info: &ServiceInfo,
    own_process_key: &str,
    own_role: AgentRole,
) -> Option<NetworkPeerService> {
    let props = info.get_properties();
    let role_str = props.get_property_val_str("role")?;
    let process_key = props.get_property_val_str("process_key")?.to_string();
    let iface = props.get_property_val_str("iface")?.to_string();
    let network_str = props.get_property_val_str("network")?;

    if process_key == own_process_key {
        return None;
    }
    let role = match role_str {
        "source" => AgentRole::Source,
        "sink" => AgentRole::Sink,
        _ => return None,
    };
    if role == own_role {
        return None; // same-role announcements are filtered
    }

    let address = *info.get_addresses().iter().next()?;
    let address = match address {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => return None,
    };
    let network: Ipv4Net = network_str.parse().ok()?;

    Some(NetworkPeerService {
        role,
        process_key,
        iface,
        address,
        network,
        port: info.get_port(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_membership_matches_same_subnet() {
        let remote = NetworkPeerService {
            role: AgentRole::Sink,
            process_key: "abc".into(),
            iface: "wlan0".into(),
            address: Ipv4Addr::new(192, 168, 1, 50),
            network: "192.168.1.0/24".parse().unwrap(),
            port: 5000,
        };
        assert!(network_matches(&remote, Ipv4Addr::new(192, 168, 1, 10)));
        assert!(!network_matches(&remote, Ipv4Addr::new(10, 0, 0, 10)));
    }
}
