//! Response caching: key construction, storage, tier policies and the
//! read-through engine.
//!
//! Two tiers share everything except their [`CachePolicy`]:
//!
//! | Tier  | Policy        | Fresh window | Store window | Revalidates |
//! |-------|---------------|--------------|--------------|-------------|
//! | API   | [`SwrPolicy`] | ~2 minutes   | ~24 hours    | yes         |
//! | Asset | [`TtlPolicy`] | = TTL        | TTL          | no          |
//!
//! The diagnostics probe report reuses [`TtlPolicy`] with a short TTL.

mod engine;
mod entry;
mod key;
mod policy;
mod store;

pub use engine::{CACHE_STATUS_HEADER, CacheEngine, Fetch, Lookup, Refresh, fetch_fn};
pub use entry::{CachedResponse, Freshness};
pub use key::CacheKey;
pub use policy::{AdmissionRejected, CachePolicy, SwrPolicy, TtlPolicy};
pub use store::{CacheStore, MemoryStore, StoreError};
