use super::{ConstantResolver, Resolution, Resolver, ResolverFactory};
use crate::endpoint::{Address, Endpoint};
use std::any::Any;
use std::net::{SocketAddrV4, SocketAddrV6};
use std::path::PathBuf;

/// A literal list of IPv4 socket addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Target(pub Vec<SocketAddrV4>);

/// A literal list of IPv6 socket addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6Target(pub Vec<SocketAddrV6>);

/// A Unix domain socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixTarget(pub PathBuf);

/// A VSOCK context id and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VsockTarget {
    pub cid: u32,
    pub port: u32,
}

fn constant(endpoints: Vec<Endpoint>) -> Box<dyn Resolver> {
    Box::new(ConstantResolver::new(Resolution {
        endpoints,
        service_config: None,
    }))
}

pub struct Ipv4ResolverFactory;

impl ResolverFactory for Ipv4ResolverFactory {
    fn make(&self, target: &(dyn Any + Send)) -> Option<Box<dyn Resolver>> {
        let target = target.downcast_ref::<Ipv4Target>()?;
        if target.0.is_empty() {
            return None;
        }
        Some(constant(
            target
                .0
                .iter()
                .map(|addr| Endpoint::single(Address::V4(*addr)))
                .collect(),
        ))
    }
}

pub struct Ipv6ResolverFactory;

impl ResolverFactory for Ipv6ResolverFactory {
    fn make(&self, target: &(dyn Any + Send)) -> Option<Box<dyn Resolver>> {
        let target = target.downcast_ref::<Ipv6Target>()?;
        if target.0.is_empty() {
            return None;
        }
        Some(constant(
            target
                .0
                .iter()
                .map(|addr| Endpoint::single(Address::V6(*addr)))
                .collect(),
        ))
    }
}

pub struct UnixResolverFactory;

impl ResolverFactory for UnixResolverFactory {
    fn make(&self, target: &(dyn Any + Send)) -> Option<Box<dyn Resolver>> {
        let target = target.downcast_ref::<UnixTarget>()?;
        Some(constant(vec![Endpoint::single(Address::Unix(
            target.0.clone(),
        ))]))
    }
}

pub struct VsockResolverFactory;

impl ResolverFactory for VsockResolverFactory {
    fn make(&self, target: &(dyn Any + Send)) -> Option<Box<dyn Resolver>> {
        let target = target.downcast_ref::<VsockTarget>()?;
        Some(constant(vec![Endpoint::single(Address::Vsock {
            cid: target.cid,
            port: target.port,
        })]))
    }
}
