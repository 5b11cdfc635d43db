//! Forwarding destination policy.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which destinations a `direct-tcpip` channel may reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForwardPolicy {
    /// Refuse every forward.
    #[default]
    Disabled,
    /// Only loopback addresses.
    Loopback,
    /// Only private-use addresses (RFC1918, RFC4193).
    PrivateNetwork,
}

impl ForwardPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Loopback => "loopback",
            Self::PrivateNetwork => "private-network",
        }
    }

    /// Whether `addr` may be dialed under this policy.
    pub fn permits(&self, addr: IpAddr) -> bool {
        match self {
            Self::Disabled => false,
            Self::Loopback => is_loopback(addr),
            Self::PrivateNetwork => is_private(addr),
        }
    }
}

impl fmt::Display for ForwardPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForwardPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" => Ok(Self::Disabled),
            "loopback" => Ok(Self::Loopback),
            "private-network" => Ok(Self::PrivateNetwork),
            other => Err(other.to_owned()),
        }
    }
}

fn unmapped(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

fn is_loopback(addr: IpAddr) -> bool {
    unmapped(addr).is_loopback()
}

fn is_unique_local(v6: &Ipv6Addr) -> bool {
    // fc00::/7
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

fn is_private(addr: IpAddr) -> bool {
    match unmapped(addr) {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(v6) => is_unique_local(&v6),
    }
}
