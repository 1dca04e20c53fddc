//! Concurrency utilities for thread-based services: a smooth token-bucket
//! rate limiter, a publish/subscribe event bus, and a cache façade.
//!
//! - [`RateLimiter`] hands out permits at a configured rate, either banking
//!   idle capacity for bursts or ramping up from a cold start.
//! - [`event::EventBus`] fans posted events out to registered listeners,
//!   with pluggable dispatch ordering and executors.
//! - [`cache::CacheBuilder`] configures bounded, expiring, observable
//!   in-memory caches.
//!
//! All three share the [`Clock`] abstraction, so every time-dependent
//! behaviour in this crate can be driven deterministically from a
//! [`ManualClock`] in tests.

pub mod cache;
mod clock;
mod error;
pub mod event;
mod executor;
mod limiter;
mod smooth;

#[cfg(feature = "quanta")]
pub use clock::QuantaClock;
pub use clock::{Clock, ManualClock, StdClock};
pub use error::{BoxError, LoadError, RateLimited, RegistrationError};
pub use executor::{DirectExecutor, Executor, Task, ThreadPerTaskExecutor};
pub use limiter::RateLimiter;
