//! Company-status resolution for job listings: decides whether the company
//! behind a listing has sponsored an H-1B petition in roughly the last year,
//! backed by a versioned, expiring verdict cache.

pub mod cache;
pub mod cache_commands;
pub mod cli;
pub mod clock;
pub mod config;
pub mod listing;
pub mod logger;
pub mod normalizer;
pub mod policy;
pub mod rate_limit;
pub mod resolver;
pub mod storage;

pub use cache::{CacheSettings, VerdictCache, VerdictOutcome, VerdictSource};
pub use normalizer::{normalize, CompanyKey, CompanyNormalizer};
pub use policy::{FilterPolicy, ListingDisposition};
pub use resolver::{HttpResolver, Resolve, ResolutionFailure, SponsorshipVerdict};
