//! Instance descriptors exchanged with a [`RuntimeClient`](crate::RuntimeClient).

use std::fmt;

use serde::{Deserialize, Serialize};

/// What to create: image, deterministic name, and the port the runner serves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    /// Image reference, `repo:tag`. A missing tag means `latest`.
    pub image: String,
    /// Container name. Also the key for later inspect and remove calls.
    pub name: String,
    /// Container port the runner listens on; published on an ephemeral host port.
    pub service_port: u16,
    /// Environment passed to the runner process.
    pub env: Vec<(String, String)>,
}

/// Coarse container status as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// Created but not started yet.
    Created,
    /// Started and not yet exited.
    Running,
    /// Exited, paused, dead, or being removed.
    Stopped,
}

/// Host-reachable address of an instance's service port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceAddress {
    /// IP or hostname, without brackets for IPv6.
    pub host: String,
    /// Published host port.
    pub port: u16,
}

impl ServiceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Build from a runtime port binding. Wildcard or empty host IPs are
    /// replaced with loopback so the address is dialable.
    pub fn from_binding(host_ip: Option<&str>, host_port: &str) -> Option<Self> {
        let port = host_port.parse::<u16>().ok().filter(|p| *p != 0)?;
        let host = match host_ip.map(str::trim) {
            None | Some("") | Some("0.0.0.0") => "127.0.0.1",
            Some("::") => "::1",
            Some(ip) => ip,
        };
        Some(Self::new(host, port))
    }

    /// `http://host:port` with IPv6 hosts bracketed.
    pub fn base_url(&self) -> String {
        if self.host.contains(':') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Snapshot of an instance as seen by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHandle {
    /// Container name the handle was looked up by.
    pub name: String,
    pub status: InstanceStatus,
    /// `None` until the runtime has assigned a host port.
    pub address: Option<ServiceAddress>,
}

impl InstanceHandle {
    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    /// The address, only if the instance is running and has a port.
    pub fn reachable_address(&self) -> Option<&ServiceAddress> {
        if self.is_running() {
            self.address.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_binding_maps_to_loopback() {
        let addr = ServiceAddress::from_binding(Some("0.0.0.0"), "49153").unwrap();
        assert_eq!(addr, ServiceAddress::new("127.0.0.1", 49153));
        let addr = ServiceAddress::from_binding(None, "49153").unwrap();
        assert_eq!(addr.host, "127.0.0.1");
    }

    #[test]
    fn explicit_binding_is_kept() {
        let addr = ServiceAddress::from_binding(Some("10.0.0.7"), "8080").unwrap();
        assert_eq!(addr.to_string(), "10.0.0.7:8080");
        assert_eq!(addr.base_url(), "http://10.0.0.7:8080");
    }

    #[test]
    fn unassigned_port_is_none() {
        assert!(ServiceAddress::from_binding(Some("0.0.0.0"), "").is_none());
        assert!(ServiceAddress::from_binding(Some("0.0.0.0"), "0").is_none());
    }

    #[test]
    fn ipv6_formatting() {
        let addr = ServiceAddress::from_binding(Some("::"), "9000").unwrap();
        assert_eq!(addr.to_string(), "[::1]:9000");
        assert_eq!(addr.base_url(), "http://[::1]:9000");
    }

    #[test]
    fn stopped_instance_is_not_reachable() {
        let handle = InstanceHandle {
            name: "runner_x".into(),
            status: InstanceStatus::Stopped,
            address: Some(ServiceAddress::new("127.0.0.1", 1)),
        };
        assert!(handle.reachable_address().is_none());
    }
}
