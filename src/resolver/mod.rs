mod dns;
mod literal;

pub use dns::{DnsResolver, DnsResolverFactory, DnsTarget};
pub use literal::{
    Ipv4ResolverFactory, Ipv4Target, Ipv6ResolverFactory, Ipv6Target, UnixResolverFactory,
    UnixTarget, VsockResolverFactory, VsockTarget,
};

use crate::endpoint::Endpoint;
use crate::service_config::ServiceConfig;
use async_trait::async_trait;
use std::any::Any;
use std::net::{SocketAddrV4, SocketAddrV6};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("A query failed: {source}")]
    Ipv4Query {
        #[source]
        source: hickory_resolver::error::ResolveError,
    },
    #[error("AAAA query failed: {source}")]
    Ipv6Query {
        #[source]
        source: hickory_resolver::error::ResolveError,
    },
    #[error("resolver configuration failed: {source}")]
    Configuration {
        #[source]
        source: hickory_resolver::error::ResolveError,
    },
    #[error("invalid target {0:?}")]
    InvalidTarget(String),
    #[error("target {0:?} resolved to no addresses")]
    NoRecords(String),
}

/// One round of name resolution: the endpoints to balance over plus any
/// service configuration published alongside them.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub endpoints: Vec<Endpoint>,
    pub service_config: Option<ServiceConfig>,
}

/// Pull-mode resolution: yields a result only when asked.
#[async_trait]
pub trait Resolver: Send {
    async fn resolve(&mut self) -> Result<Resolution, ResolveError>;
}

/// Maker for one concrete target type. `make` inspects the opaque target
/// and returns `None` when it is not the type this factory understands.
pub trait ResolverFactory: Send + Sync {
    fn make(&self, target: &(dyn Any + Send)) -> Option<Box<dyn Resolver>>;
}

/// Ordered factory list; the first factory claiming a target wins.
pub struct ResolverRegistry {
    factories: Vec<Box<dyn ResolverFactory>>,
}

impl ResolverRegistry {
    /// Registry with every built-in resolver, literal families first so a
    /// catch-all DNS factory never shadows them.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: vec![
                Box::new(Ipv4ResolverFactory),
                Box::new(Ipv6ResolverFactory),
                Box::new(UnixResolverFactory),
                Box::new(VsockResolverFactory),
                Box::new(DnsResolverFactory),
            ],
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    pub fn register(&mut self, factory: Box<dyn ResolverFactory>) {
        self.factories.push(factory);
    }

    #[must_use]
    pub fn resolver_for(&self, target: &(dyn Any + Send)) -> Option<Box<dyn Resolver>> {
        self.factories.iter().find_map(|f| f.make(target))
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Trivial pull resolver returning the same resolution forever.
#[derive(Debug, Clone)]
pub struct ConstantResolver {
    resolution: Resolution,
}

impl ConstantResolver {
    #[must_use]
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }
}

#[async_trait]
impl Resolver for ConstantResolver {
    async fn resolve(&mut self) -> Result<Resolution, ResolveError> {
        Ok(self.resolution.clone())
    }
}

/// Push-mode adapter: polls a resolver on an interval and exposes the
/// results as an asynchronous sequence. Dropping the stream stops the
/// polling task, so no background work outlives its consumer.
pub struct ResolutionStream {
    results: mpsc::Receiver<Result<Resolution, ResolveError>>,
    task: JoinHandle<()>,
}

impl ResolutionStream {
    #[must_use]
    pub fn spawn(mut resolver: Box<dyn Resolver>, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            loop {
                let result = resolver.resolve().await;
                if tx.send(result).await.is_err() {
                    return;
                }
                tokio::time::sleep(interval).await;
            }
        });
        Self { results: rx, task }
    }

    pub async fn next(&mut self) -> Option<Result<Resolution, ResolveError>> {
        self.results.recv().await
    }
}

impl Drop for ResolutionStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Parses a logical target string into the matching opaque target value:
/// `ipv4:`/`ipv6:` literal lists, `unix:` paths, `vsock:cid:port`, and
/// `dns://` (also the schemeless default).
pub fn parse_target(target: &str) -> Result<Box<dyn Any + Send>, ResolveError> {
    let invalid = || ResolveError::InvalidTarget(target.to_owned());

    if let Some(rest) = target.strip_prefix("ipv4:") {
        let addresses = rest
            .split(',')
            .map(|part| part.trim().parse::<SocketAddrV4>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;
        if addresses.is_empty() {
            return Err(invalid());
        }
        return Ok(Box::new(Ipv4Target(addresses)));
    }
    if let Some(rest) = target.strip_prefix("ipv6:") {
        let addresses = rest
            .split(',')
            .map(|part| part.trim().parse::<SocketAddrV6>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;
        if addresses.is_empty() {
            return Err(invalid());
        }
        return Ok(Box::new(Ipv6Target(addresses)));
    }
    if let Some(rest) = target.strip_prefix("unix:") {
        let path = rest.strip_prefix("//").unwrap_or(rest);
        if path.is_empty() {
            return Err(invalid());
        }
        return Ok(Box::new(UnixTarget(PathBuf::from(path))));
    }
    if let Some(rest) = target.strip_prefix("vsock:") {
        let (cid, port) = rest.split_once(':').ok_or_else(invalid)?;
        return Ok(Box::new(VsockTarget {
            cid: cid.parse().map_err(|_| invalid())?,
            port: port.parse().map_err(|_| invalid())?,
        }));
    }

    if target.starts_with("dns://") {
        let url = url::Url::parse(target).map_err(|_| invalid())?;
        let host = url.host_str().ok_or_else(invalid)?;
        return Ok(Box::new(DnsTarget {
            host: host.to_owned(),
            port: url.port().unwrap_or(DnsTarget::DEFAULT_PORT),
        }));
    }

    let rest = target.strip_prefix("dns:").unwrap_or(target);
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return Err(invalid());
    }
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
        None => (rest, DnsTarget::DEFAULT_PORT),
    };
    Ok(Box::new(DnsTarget {
        host: host.to_owned(),
        port,
    }))
}
