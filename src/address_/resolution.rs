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

use std::error::Error as StdError;
use std::fmt::Debug;
use std::io::Result as IoResult;
use std::net::ToSocketAddrs;
use std::sync::Arc;

use log::debug;

use super::Address;
use crate::error_::{DriverError, Result};

// imports for docs
#[allow(unused)]
use crate::driver::DriverConfig;

type BoxError = Box<dyn StdError + Send + Sync>;
/// See [`AddressResolver::resolve()`].
pub type AddressResolverReturn = std::result::Result<Vec<Address>, BoxError>;

/// A trait for custom address resolution.
///
/// See [`DriverConfig::with_resolver()`].
pub trait AddressResolver: Debug + Send + Sync {
    /// must not return an empty vector
    fn resolve(&self, address: &Address) -> AddressResolverReturn;
}

/// Every address the driver wants to connect to passes through here: first
/// the application-supplied resolver (if any), then DNS. The result keeps
/// the pre-DNS host name around for TLS and pool bookkeeping.
pub(crate) fn resolve_targets(
    address: &Arc<Address>,
    resolver: Option<&dyn AddressResolver>,
) -> Result<Vec<IoResult<Arc<Address>>>> {
    let mut targets = Vec::new();
    for address in apply_resolver(address, resolver)? {
        match dns_lookup(&address) {
            Ok(resolved) => targets.extend(resolved.into_iter().map(Ok)),
            Err(err) => targets.push(Err(err)),
        }
    }
    Ok(targets)
}

fn apply_resolver(
    address: &Arc<Address>,
    resolver: Option<&dyn AddressResolver>,
) -> Result<Vec<Arc<Address>>> {
    let Some(resolver) = resolver else {
        return Ok(vec![Arc::clone(address)]);
    };
    debug!("custom resolver in: {address}");
    let resolved = resolver.resolve(address).map_err(|err| {
        debug!("custom resolver failed: {err:?}");
        DriverError::invalid_argument(format!("address resolver callback failed: {err}"))
    })?;
    debug!(
        "custom resolver out: {:?}",
        resolved.iter().map(|a| format!("{a}")).collect::<Vec<_>>()
    );
    if resolved.is_empty() {
        return Err(DriverError::invalid_argument(
            "DriverConfig::resolver returned no addresses",
        ));
    }
    Ok(resolved.into_iter().map(Arc::new).collect())
}

fn dns_lookup(address: &Arc<Address>) -> IoResult<Vec<Arc<Address>>> {
    if address.is_numeric() {
        return Ok(vec![Arc::clone(address)]);
    }
    debug!("dns resolver in: {address}");
    let result = address.to_socket_addrs().map(|resolved| {
        resolved
            .map(|sock_addr| Arc::new(address.resolved_to(sock_addr)))
            .collect::<Vec<_>>()
    });
    match &result {
        Ok(resolved) => debug!(
            "dns resolver out: {:?}",
            resolved.iter().map(|a| format!("{a}")).collect::<Vec<_>>()
        ),
        Err(err) => debug!("dns resolver out: {err:?}"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct StaticResolver(Vec<(&'static str, u16)>);

    impl AddressResolver for StaticResolver {
        fn resolve(&self, _address: &Address) -> AddressResolverReturn {
            Ok(self.0.iter().map(|&pair| Address::from(pair)).collect())
        }
    }

    #[test]
    fn without_resolver_the_address_passes_through() {
        let address = Arc::new(Address::from("10.0.0.1:7687"));
        let targets = resolve_targets(&address, None).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(*targets[0].as_ref().unwrap().as_ref(), *address);
    }

    #[test]
    fn resolver_output_replaces_the_address() {
        let resolver = StaticResolver(vec![("10.0.0.1", 1111), ("10.0.0.2", 2222)]);
        let address = Arc::new(Address::from("whatever:7687"));
        let targets = resolve_targets(&address, Some(&resolver)).unwrap();
        let hosts = targets
            .into_iter()
            .map(|t| t.unwrap().port())
            .collect::<Vec<_>>();
        assert_eq!(hosts, vec![1111, 2222]);
    }

    #[test]
    fn empty_resolver_output_is_rejected() {
        let resolver = StaticResolver(vec![]);
        let address = Arc::new(Address::from("whatever:7687"));
        assert!(resolve_targets(&address, Some(&resolver)).is_err());
    }
}
