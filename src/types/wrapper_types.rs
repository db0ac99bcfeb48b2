//! Common type aliases used across the codebase.

use std::future::Future;
use std::pin::Pin;

/// A boxed, pinned, send-safe future.
///
/// Lets the transport seam hand back readiness futures from a plain trait
/// method so the reactor can poll a heterogeneous set of them together.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
