//! Browser-facing frontend: a WebSocket fan-out server sitting in front of
//! the leader-aware `Resolver` (spec.md §4.7). Kept as its own process (see
//! `bin/frontend.rs`) so it can scale and restart independently of the
//! consensus cluster it talks to.

pub mod ws;

pub use ws::FrontendServer;
