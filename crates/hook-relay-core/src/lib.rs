//! # Hook Relay Core
//!
//! Authentication and transformation pipeline for the GitHub webhook relay.
//!
//! - [`allowlist`]: authenticates a delivery by its source address against
//!   GitHub's published ranges.
//! - [`transform`]: rewrites comment events into push envelopes, enriched
//!   with installation-scoped lookups.
//! - [`headers`]: the fixed set of headers relayed downstream.
//!
//! Nothing here knows about HTTP servers; the API crate adapts requests into
//! [`RequestOrigin`] and header maps.

pub mod allowlist;
pub mod headers;
pub mod transform;

pub use allowlist::{IpAllowlist, IpRangeSet, IpRangeSource, RequestOrigin};
pub use headers::ForwardedHeaders;
pub use transform::{Enriched, PassthroughReason, PayloadTransformer, TransformOutcome};
