//! Core pipeline vocabulary for the vigil message-routing daemon.
//!
//! Everything here is transport-agnostic: the envelope type, the route
//! table and router, text transforms, the attachment allow-list, rate-limit
//! and metrics plumbing. The source and destination adapters live in their
//! own crates and depend on this one.

pub mod allow;
pub mod chunk;
pub mod config;
pub mod defang;
pub mod envelope;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod parse;
pub mod ratelimit;
pub mod route;

pub use config::{Destination, DestinationKind, FeedSpec, Route, RouteTable, Rule};
pub use envelope::{
    EnvelopeSink, MediaHandle, MediaKind, MediaNote, MessageEnvelope, ReplyContext, SendOutcome,
    SourceKind,
};
pub use error::{CoreError, Result};
pub use metrics::MetricsCollector;
pub use parse::ParserSpec;
pub use ratelimit::RateLimiter;
pub use route::{Matched, Router};
