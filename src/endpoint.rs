use std::net::{SocketAddrV4, SocketAddrV6};
use std::path::PathBuf;

/// A single reachable address for a sub-channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Address {
    #[display(fmt = "ipv4:{}", _0)]
    V4(SocketAddrV4),
    #[display(fmt = "ipv6:{}", _0)]
    V6(SocketAddrV6),
    #[display(fmt = "unix:{}", "_0.display()")]
    Unix(PathBuf),
    #[display(fmt = "vsock:{}:{}", cid, port)]
    Vsock { cid: u32, port: u32 },
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("an endpoint requires at least one address")]
pub struct EmptyEndpoint;

/// An ordered, non-empty list of equivalent addresses. Earlier addresses
/// are preferred when dialing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    addresses: Vec<Address>,
}

impl Endpoint {
    pub fn new(addresses: Vec<Address>) -> Result<Self, EmptyEndpoint> {
        if addresses.is_empty() {
            return Err(EmptyEndpoint);
        }
        Ok(Self { addresses })
    }

    #[must_use]
    pub fn single(address: Address) -> Self {
        Self {
            addresses: vec![address],
        }
    }

    #[must_use]
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    #[must_use]
    pub fn preferred(&self) -> &Address {
        // unwrap: the constructor rejects empty lists
        self.addresses.first().unwrap()
    }
}
