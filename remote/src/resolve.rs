//! Deciding whether a host name refers to the machine we are running on.

use std::net::{IpAddr, ToSocketAddrs};

/// Host name every local alias collapses to.
pub const LOCALHOST: &str = "localhost";

pub trait Resolver: std::fmt::Debug + Send + Sync {
    /// Whether `host` names this machine.
    fn is_local(&self, host: &str) -> bool;

    /// Canonical form used for same-host comparisons.
    fn resolve(&self, host: &str) -> String {
        if self.is_local(host) {
            LOCALHOST.to_string()
        } else {
            host.to_ascii_lowercase()
        }
    }
}

/// Resolver backed by the machine's hostname, interfaces and DNS.
#[derive(Debug)]
pub struct SystemResolver {
    hostname: Option<String>,
    addresses: Vec<IpAddr>,
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemResolver {
    #[must_use]
    pub fn new() -> Self {
        let hostname = nix::unistd::gethostname()
            .ok()
            .and_then(|name| name.into_string().ok());
        let addresses = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces.iter().map(if_addrs::Interface::ip).collect(),
            Err(error) => {
                tracing::warn!("failed to list network interfaces: {:#}", &error);
                vec![]
            }
        };
        tracing::debug!("local hostname: {:?}, addresses: {:?}", hostname, addresses);
        Self {
            hostname,
            addresses,
        }
    }

    fn is_local_address(&self, address: &IpAddr) -> bool {
        address.is_loopback() || self.addresses.contains(address)
    }

    fn is_hostname(&self, host: &str) -> bool {
        self.hostname.as_deref().is_some_and(|hostname| {
            hostname.eq_ignore_ascii_case(host)
                || hostname
                    .split('.')
                    .next()
                    .is_some_and(|short| short.eq_ignore_ascii_case(host))
        })
    }
}

impl Resolver for SystemResolver {
    fn is_local(&self, host: &str) -> bool {
        self.resolve(host) == LOCALHOST
    }

    /// Local names become `localhost`, other names the lowest address they resolve
    /// to, so aliases of one remote machine compare equal. Names that do not resolve
    /// are kept, lowercased.
    fn resolve(&self, host: &str) -> String {
        if host.eq_ignore_ascii_case(LOCALHOST) || self.is_hostname(host) {
            return LOCALHOST.to_string();
        }
        let addresses: Vec<IpAddr> = match host.parse::<IpAddr>() {
            Ok(address) => vec![address],
            Err(_) => match (host, 0).to_socket_addrs() {
                Ok(addresses) => addresses.map(|address| address.ip()).collect(),
                Err(error) => {
                    tracing::debug!("cannot resolve {:?}: {}", host, &error);
                    vec![]
                }
            },
        };
        if addresses.iter().any(|address| self.is_local_address(address)) {
            return LOCALHOST.to_string();
        }
        canonical_address(addresses).unwrap_or_else(|| host.to_ascii_lowercase())
    }
}

/// Stable identity for a set of addresses of one machine.
fn canonical_address<I: IntoIterator<Item = IpAddr>>(addresses: I) -> Option<String> {
    addresses
        .into_iter()
        .min()
        .map(|address| address.to_string())
}

/// Resolver with a fixed set of local names, for tests and dry runs.
#[derive(Debug, Default)]
pub struct StaticResolver {
    local: Vec<String>,
}

impl StaticResolver {
    pub fn new<I, S>(local: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            local: local.into_iter().map(Into::into).collect(),
        }
    }
}

impl Resolver for StaticResolver {
    fn is_local(&self, host: &str) -> bool {
        host.eq_ignore_ascii_case(LOCALHOST)
            || self
                .local
                .iter()
                .any(|name| name.eq_ignore_ascii_case(host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_and_loopback_are_local() {
        let resolver = SystemResolver::new();
        assert!(resolver.is_local("localhost"));
        assert!(resolver.is_local("LOCALHOST"));
        assert!(resolver.is_local("127.0.0.1"));
        assert!(resolver.is_local("::1"));
        assert_eq!(resolver.resolve("127.0.0.1"), "localhost");
    }

    #[test]
    fn own_hostname_is_local() {
        let resolver = SystemResolver::new();
        if let Some(hostname) = resolver.hostname.clone() {
            assert!(resolver.is_local(&hostname));
        }
    }

    #[test]
    fn unknown_hosts_are_remote() {
        let resolver = SystemResolver::new();
        assert!(!resolver.is_local("192.0.2.77"));
        assert!(!resolver.is_local("no-such-host.invalid"));
        assert_eq!(resolver.resolve("Backup.Invalid"), "backup.invalid");
    }

    #[test]
    fn remote_addresses_are_canonical() {
        let resolver = SystemResolver::new();
        assert_eq!(resolver.resolve("192.0.2.77"), "192.0.2.77");
        let first: Vec<IpAddr> = vec!["192.0.2.9".parse().unwrap(), "192.0.2.5".parse().unwrap()];
        let second: Vec<IpAddr> = vec!["192.0.2.5".parse().unwrap(), "192.0.2.9".parse().unwrap()];
        assert_eq!(canonical_address(first), Some("192.0.2.5".to_string()));
        assert_eq!(canonical_address(second), Some("192.0.2.5".to_string()));
        assert_eq!(canonical_address(Vec::<IpAddr>::new()), None);
    }

    #[test]
    fn static_resolver_uses_its_list() {
        let resolver = StaticResolver::new(["laptop"]);
        assert!(resolver.is_local("laptop"));
        assert!(resolver.is_local("localhost"));
        assert!(!resolver.is_local("server"));
        assert_eq!(resolver.resolve("laptop"), "localhost");
        assert_eq!(resolver.resolve("server"), "server");
    }
}
