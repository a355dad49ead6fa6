//! OS interface enumeration and classification.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

/// Coarse classification of a physical interface, used for the
/// `ALLOW_DEVICE_TYPES` env-controlled allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    Wifi,
    Ethernet,
    Ppp,
    Other,
}

impl InterfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Wifi => "wifi",
            InterfaceKind::Ethernet => "ethernet",
            InterfaceKind::Ppp => "ppp",
            InterfaceKind::Other => "other",
        }
    }

    /// Classify an interface purely from its OS name, matching the common
    /// Linux naming conventions (`wlan*`/`wl*` for Wi-Fi, `eth*`/`en*` for
    /// Ethernet, `ppp*` for PPP links).
    pub fn classify(name: &str) -> Self {
        if name.starts_with("wlan") || name.starts_with("wl") {
            InterfaceKind::Wifi
        } else if name.starts_with("eth") || name.starts_with("en") {
            InterfaceKind::Ethernet
        } else if name.starts_with("ppp") {
            InterfaceKind::Ppp
        } else {
            InterfaceKind::Other
        }
    }
}

/// One OS-reported interface, as seen by the discovery loop.
#[derive(Debug, Clone)]
pub struct OsInterface {
    pub name: String,
    pub kind: InterfaceKind,
    pub ipv4: Option<Ipv4Addr>,
    /// IPv4 network (address + netmask prefix length), used to match peer
    /// discovery advertisements to the same subnet.
    pub network: Option<Ipv4Net>,
}

/// Enumerate every up, non-loopback OS network interface via
/// `getifaddrs(3)`.
pub fn enumerate() -> Vec<OsInterface> {
    let mut seen: Vec<OsInterface> = Vec::new();

    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(&mut ifaddrs) != 0 {
            return seen;
        }

        let mut current = ifaddrs;
        while !current.is_null() {
            let ifa = &*current;
            current = ifa.ifa_next;

            if ifa.ifa_addr.is_null() {
                continue;
            }
            if ifa.ifa_flags & (libc::IFF_UP as u32) == 0 {
                continue;
            }
            if ifa.ifa_flags & (libc::IFF_LOOPBACK as u32) != 0 {
                continue;
            }
            if (*ifa.ifa_addr).sa_family != libc::AF_INET as u16 {
                continue;
            }

            let name = std::ffi::CStr::from_ptr(ifa.ifa_name)
                .to_string_lossy()
                .into_owned();
            let sockaddr = &*(ifa.ifa_addr as *const libc::sockaddr_in);
            let ip = Ipv4Addr::from(u32::from_be(sockaddr.sin_addr.s_addr));

            let network = if ifa.ifa_netmask.is_null() {
                None
            } else {
                let mask_addr = &*(ifa.ifa_netmask as *const libc::sockaddr_in);
                let mask = u32::from_be(mask_addr.sin_addr.s_addr);
                Ipv4Net::new(ip, mask.count_ones() as u8).ok()
            };

            if let Some(existing) = seen.iter_mut().find(|i| i.name == name) {
                existing.ipv4 = Some(ip);
                existing.network = network;
            } else {
                seen.push(OsInterface {
                    kind: InterfaceKind::classify(&name),
                    name,
                    ipv4: Some(ip),
                    network,
                });
            }
        }

        libc::freeifaddrs(ifaddrs);
    }

    seen
}

/// Parse the `ALLOW_DEVICE_TYPES` env var (csv of kind names, or `all`).
pub fn allowed_kinds_from_env() -> Option<Vec<InterfaceKind>> {
    let raw = std::env::var("ALLOW_DEVICE_TYPES").ok()?;
    if raw.trim().eq_ignore_ascii_case("all") {
        return None;
    }
    Some(
        raw.split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| match s {
                "wifi" => InterfaceKind::Wifi,
                "ethernet" => InterfaceKind::Ethernet,
                "ppp" => InterfaceKind::Ppp,
                _ => InterfaceKind::Other,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_names() {
        assert_eq!(InterfaceKind::classify("wlan0"), InterfaceKind::Wifi);
        assert_eq!(InterfaceKind::classify("eth0"), InterfaceKind::Ethernet);
        assert_eq!(InterfaceKind::classify("enp3s0"), InterfaceKind::Ethernet);
        assert_eq!(InterfaceKind::classify("ppp0"), InterfaceKind::Ppp);
        assert_eq!(InterfaceKind::classify("lo"), InterfaceKind::Other);
    }

    #[test]
    fn enumerate_finds_at_least_loopback_excluded() {
        // Can't assert specific interfaces in CI, but the call must not panic.
        let ifaces = enumerate();
        assert!(ifaces.iter().all(|i| i.name != "lo"));
    }

    #[test]
    fn allow_all_disables_filter() {
        std::env::set_var("ALLOW_DEVICE_TYPES", "all");
        assert!(allowed_kinds_from_env().is_none());
        std::env::remove_var("ALLOW_DEVICE_TYPES");
    }
}
