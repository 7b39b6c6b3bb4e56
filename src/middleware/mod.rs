//! Observers that run on the consumer threads around every handler execution.
//!
//! Middleware see each dispatch before and after its handler runs, in the
//! order they were installed. They cannot reject or alter a dispatch.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use brrtmediator::middleware::{MetricsMiddleware, TracingMiddleware};
//!
//! let metrics = Arc::new(MetricsMiddleware::new());
//! let mediator = Mediator::builder(registry)
//!     .middleware(Arc::new(TracingMiddleware))
//!     .middleware(metrics.clone())
//!     .build()?;
//! ```

mod core;
mod metrics;
mod tracing;

pub use core::{DispatchContext, DispatchOutcome, Middleware};
pub use metrics::{MessageStats, MetricsMiddleware};
pub use tracing::TracingMiddleware;
