#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation,
)]

mod balancer;
mod compression;
mod connection;
mod endpoint;
mod flags;
mod frame;
mod framing;
mod metadata;
mod queue;
mod resolver;
mod rpc;
mod service_config;
mod status;
mod stream;
mod types;
mod writer;

pub use balancer::{Balancer, BalancerDriver, ConnectivityState, Subchannel};
pub use bytes::Bytes;
pub use compression::{
    codec_for, decoder_for, DecompressError, Encoding, Gzip, MessageCodec, MessageDecoder,
};
pub use connection::{
    ConnEffect, ConnEvent, ConnectionConfig, ConnectionDriver, ConnectionHandle,
    ConnectionManager, FlushKind, ShutdownReason, TimerKind,
};
pub use endpoint::{Address, EmptyEndpoint, Endpoint};
pub use flags::{DataFlags, HeadersFlags, PingFlags};
pub use frame::Frame;
pub use framing::{Deframer, Framer, DEFAULT_MAX_PAYLOAD, FRAME_PREFIX_LEN};
pub use metadata::{is_reserved_key, Metadata, MetadataError, MetadataValue, RESERVED_KEYS};
pub use queue::RequestQueue;
pub use resolver::{
    parse_target, ConstantResolver, DnsResolver, DnsResolverFactory, DnsTarget,
    Ipv4ResolverFactory, Ipv4Target, Ipv6ResolverFactory, Ipv6Target, Resolution,
    ResolutionStream, ResolveError, Resolver, ResolverFactory, ResolverRegistry,
    UnixResolverFactory, UnixTarget, VsockResolverFactory, VsockTarget,
};
pub use rpc::{
    encode_timeout, parse_timeout, response_head, status_from_trailers, trailers, trailers_only,
    CallKind, MethodPath, RequestHead, CONTENT_TYPE,
};
#[cfg(feature = "json")]
pub use service_config::{parse_service_config, select_choice, ServiceConfigChoice, ServiceConfigJson};
pub use service_config::{
    parse_retry_pushback, MethodConfig, RetryPolicy, RetryPushback, ServiceConfig,
};
pub use status::{Code, Status};
pub use stream::{StreamAction, StreamEvent, StreamMachine, StreamRole, StreamState};
pub use types::{ErrorType, NonZeroStreamId, StreamId, U31_MAX};
pub use url::Url;
pub use writer::{StreamWriter, WriteError, DEFAULT_MAX_PENDING};
