//! Check identity.
//!
//! A [`CheckKey`] names one physical probe target: the resolved address, the
//! port, the probe type and an optional discriminator (HTTP path, DNS name).
//! Host groups that reference the same target share one key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Probe strategy used for a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    /// No probe; the target is always reported healthy.
    None,
    Dns,
    Tcp,
    Http,
    Ftp,
    /// HTTP fetch of auxiliary load data.
    Aux,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::None => "none",
            CheckType::Dns => "dns",
            CheckType::Tcp => "tcp",
            CheckType::Http => "http",
            CheckType::Ftp => "ftp",
            CheckType::Aux => "aux",
        }
    }

    /// Whether the probe connects to a port on the target address.
    pub fn uses_port(&self) -> bool {
        matches!(self, CheckType::Tcp | CheckType::Http | CheckType::Ftp | CheckType::Aux)
    }

    /// Port used when a host group does not name one.
    pub fn default_port(&self) -> u16 {
        match self {
            CheckType::Http | CheckType::Aux => 80,
            CheckType::Ftp => 21,
            CheckType::Dns => 53,
            CheckType::Tcp | CheckType::None => 0,
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address families a host group wants checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DualStack {
    #[default]
    V4,
    V6,
    Both,
}

impl DualStack {
    pub fn accepts(&self, addr: &IpAddr) -> bool {
        match self {
            DualStack::V4 => addr.is_ipv4(),
            DualStack::V6 => addr.is_ipv6(),
            DualStack::Both => true,
        }
    }

    /// Smallest selection covering both `self` and `other`.
    pub fn merge(self, other: DualStack) -> DualStack {
        if self == other {
            self
        } else {
            DualStack::Both
        }
    }
}

/// What is probed on an address, independent of the address itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckTarget {
    pub port: u16,
    pub check_type: CheckType,
    pub check_info: Option<String>,
}

impl CheckTarget {
    pub fn new(check_type: CheckType, port: u16, check_info: Option<String>) -> Self {
        Self {
            port,
            check_type,
            check_info,
        }
    }
}

/// Unique identifier of one physical probe target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckKey {
    pub address: IpAddr,
    pub port: u16,
    pub check_type: CheckType,
    pub discriminator: Option<String>,
}

impl CheckKey {
    pub fn new(address: IpAddr, target: &CheckTarget) -> Self {
        Self {
            address,
            port: target.port,
            check_type: target.check_type,
            discriminator: target.check_info.clone(),
        }
    }

    pub fn target(&self) -> CheckTarget {
        CheckTarget::new(self.check_type, self.port, self.discriminator.clone())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for CheckKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.check_type, self.socket_addr())?;
        if let Some(info) = &self.discriminator {
            if !info.starts_with('/') {
                f.write_str("/")?;
            }
            f.write_str(info)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let target = CheckTarget::new(CheckType::Http, 8080, Some("/status".into()));
        let key = CheckKey::new("10.0.0.1".parse().unwrap(), &target);
        assert_eq!(key.to_string(), "http://10.0.0.1:8080/status");

        let v6 = CheckKey::new("::1".parse().unwrap(), &CheckTarget::new(CheckType::Tcp, 22, None));
        assert_eq!(v6.to_string(), "tcp://[::1]:22");
    }

    #[test]
    fn test_same_target_same_key() {
        let addr: IpAddr = "192.0.2.7".parse().unwrap();
        let a = CheckKey::new(addr, &CheckTarget::new(CheckType::Http, 443, None));
        let b = CheckKey::new(addr, &CheckTarget::new(CheckType::Http, 443, None));
        assert_eq!(a, b);
        assert_eq!(a.target(), CheckTarget::new(CheckType::Http, 443, None));
    }

    #[test]
    fn test_dual_stack_filter() {
        let v4: IpAddr = "127.0.0.1".parse().unwrap();
        let v6: IpAddr = "::1".parse().unwrap();
        assert!(DualStack::V4.accepts(&v4));
        assert!(!DualStack::V4.accepts(&v6));
        assert!(DualStack::Both.accepts(&v6));
        assert_eq!(DualStack::V4.merge(DualStack::V6), DualStack::Both);
        assert_eq!(DualStack::V6.merge(DualStack::V6), DualStack::V6);
    }
}
