// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub(crate) mod resolution;

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::vec::IntoIter;

pub(crate) const DEFAULT_PORT: u16 = 7687;

/// A server address.
///
/// # Example
/// ```
/// use bolt_transport::address::Address;
///
/// // can be constructed from (&str, u16)
/// let address = Address::from(("localhost", 1234));
/// assert_eq!(address.host(), "localhost");
/// assert_eq!(address.port(), 1234);
///
/// // can be constructed from &str
/// let address = Address::from("example.com:5678");
/// assert_eq!(address.host(), "example.com");
/// assert_eq!(address.port(), 5678);
///
/// // or using the default port
/// let address = Address::from("localhost");
/// assert_eq!(address.host(), "localhost");
/// assert_eq!(address.port(), 7687);
///
/// // as well as IPv4 or IPv6 addresses
/// let address = Address::from("127.0.0.1:1234");
/// assert_eq!(address.host(), "127.0.0.1");
/// assert_eq!(address.port(), 1234);
///
/// let address = Address::from("[::1]:4321");
/// assert_eq!(address.host(), "[::1]");
/// assert_eq!(address.port(), 4321);
/// ```
#[derive(Debug, Clone)]
pub struct Address {
    host: String,
    port: u16,
    /// The host this address was DNS-resolved from (equal to `host` for
    /// unresolved addresses); also used for TLS SNI and equality.
    key: String,
}

/// Note that equality of addresses is defined as equality of its
/// [`Address::unresolved_host()`] and [`Address::port()`] only.
/// Therefore, addresses resolved to different IPs coming from the same host
/// are considered equal if their port is equal as well.
impl PartialEq for Address {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.port == other.port
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.port.hash(state);
    }
}

impl Address {
    /// Return the host name or IP address.
    ///
    /// For addresses that have been resolved by the driver, this is the final
    /// IP address after all resolutions (custom resolver, then DNS).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Return the port number.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Return the host name (before a potential DNS resolution).
    pub fn unresolved_host(&self) -> &str {
        &self.key
    }

    pub(crate) fn resolved_to(&self, resolved: SocketAddr) -> Self {
        Self {
            host: resolved.ip().to_string(),
            port: resolved.port(),
            key: self.key.clone(),
        }
    }

    pub(crate) fn is_numeric(&self) -> bool {
        IpAddr::from_str(strip_brackets(&self.host)).is_ok()
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.host.contains(':') && !self.host.starts_with('[') {
            true => write!(f, "[{}]:{}", self.host, self.port),
            false => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

impl From<(String, u16)> for Address {
    fn from((host, port): (String, u16)) -> Self {
        // normalize IP spellings so `127.00.1:x` and `127.0.0.1:x` compare
        // equal
        let key = match IpAddr::from_str(strip_brackets(&host)) {
            Ok(ip) => ip.to_string(),
            Err(_) => host.clone(),
        };
        Self { host, port, key }
    }
}

impl From<(&str, u16)> for Address {
    fn from((host, port): (&str, u16)) -> Self {
        Self::from((String::from(host), port))
    }
}

impl From<&str> for Address {
    fn from(input: &str) -> Self {
        let (host, port) = split_host_port(input);
        Self::from((host, port.unwrap_or(DEFAULT_PORT)))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::from((addr.ip().to_string(), addr.port()))
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|host| host.strip_suffix(']'))
        .unwrap_or(host)
}

/// Splits `host[:port]`, coping with bracketed and bare IPv6 notations.
/// Routing tables may hand out full URIs; a leading scheme is dropped.
fn split_host_port(input: &str) -> (String, Option<u16>) {
    let input = match input.split_once("://") {
        Some((_scheme, rest)) => rest,
        None => input,
    };
    if let Some(rest) = input.strip_prefix('[') {
        // [IPv6] or [IPv6]:port
        return match rest.split_once(']') {
            Some((host, port)) => (
                format!("[{host}]"),
                port.strip_prefix(':').and_then(|p| p.parse().ok()),
            ),
            None => (String::from(input), None),
        };
    }
    match input.bytes().filter(|&b| b == b':').count() {
        0 => (String::from(input), None),
        1 => {
            let (host, port) = input.split_once(':').expect("counted one colon");
            (String::from(host), port.parse().ok())
        }
        // several colons without brackets: a bare IPv6 address, no port
        _ => (String::from(input), None),
    }
}

impl ToSocketAddrs for Address {
    type Iter = IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        (strip_brackets(&self.host), self.port).to_socket_addrs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::*;

    #[rstest]
    #[case("localhost", "localhost", DEFAULT_PORT)]
    #[case("localhost:1234", "localhost", 1234)]
    #[case("example.com:bogus", "example.com", DEFAULT_PORT)]
    #[case("127.0.0.1", "127.0.0.1", DEFAULT_PORT)]
    #[case("127.0.0.1:4321", "127.0.0.1", 4321)]
    #[case("::1", "::1", DEFAULT_PORT)]
    #[case("[::1]", "[::1]", DEFAULT_PORT)]
    #[case("[::1]:1234", "[::1]", 1234)]
    #[case("bolt://server:1234", "server", 1234)]
    #[case("neo4j+s://server", "server", DEFAULT_PORT)]
    fn test_parse(#[case] input: &str, #[case] host: &str, #[case] port: u16) {
        let address = Address::from(input);
        assert_eq!(address.host(), host);
        assert_eq!(address.port(), port);
    }

    #[test]
    fn equality_ignores_dns_resolution() {
        let unresolved = Address::from(("localhost", 7687));
        let resolved = unresolved.resolved_to(SocketAddr::from(([127, 0, 0, 1], 7687)));
        assert_eq!(unresolved, resolved);
        assert_eq!(resolved.host(), "127.0.0.1");
        assert_eq!(resolved.unresolved_host(), "localhost");
    }

    #[test]
    fn numeric_hosts_are_detected() {
        assert!(Address::from("127.0.0.1").is_numeric());
        assert!(Address::from("[::1]:7687").is_numeric());
        assert!(!Address::from("localhost").is_numeric());
    }
}
