//! # GitHub App Client
//!
//! Authenticates as a GitHub App and performs the identity lookups the relay
//! needs to enrich webhook payloads:
//!
//! - minting short-lived RS256 application assertions
//! - resolving a repository's installation and exchanging installation tokens
//! - looking up user emails and repository default branches
//! - fetching GitHub's published webhook source ranges
//!
//! All lookups go through keyed [`cache::TtlCache`] domains with a fixed
//! time-to-live and per-key refresh coalescing.

pub mod auth;
pub mod cache;
pub mod client;
pub mod error;

pub use auth::{AppAssertion, AppCredentials, GitHubAppId, InstallationId, InstallationToken};
pub use cache::TtlCache;
pub use client::{
    ClientConfig, GitHubAppClient, GitHubMeta, IdentityCacheTtls, IdentityProvider,
    InstallationClient, InstallationLookups,
};
pub use error::{ApiError, AuthError};
