//! # frontdoor
//!
//! An edge router that sits in front of a content origin (a CMS with a JSON
//! API) and a page rendering service. It filters abusive traffic, sheds load
//! on the renderer, and serves the origin's API from a stale-while-revalidate
//! cache.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use frontdoor::config::Settings;
//! use frontdoor::edge::{Backends, EdgeService};
//! use frontdoor::server::Server;
//! use frontdoor::Request;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::defaults()?;
//!     let edge = EdgeService::new(&settings, Backends::from_settings(&settings)?);
//!     let server = Server::bind(settings.server.listen).await?;
//!     server
//!         .run(
//!             move |req: Request| {
//!                 let edge = edge.clone();
//!                 async move { edge.handle(req).await }
//!             },
//!             CancellationToken::new(),
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```

// ── Wire layer ────────────────────────────────────────────────────────────────
pub mod http;
pub mod server;
pub mod upstream;

// ── Request pipeline ──────────────────────────────────────────────────────────
pub mod context;
pub mod edge;
pub mod error;
pub mod middleware;
pub mod router;
pub mod security;

// ── Caching and flow control ─────────────────────────────────────────────────
pub mod background;
pub mod cache;
pub mod gate;

// ── Operations ────────────────────────────────────────────────────────────────
pub mod config;
pub mod diagnostics;
pub mod stats;
pub mod telemetry;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use edge::{Backends, EdgeService};
pub use error::EdgeError;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
