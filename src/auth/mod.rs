//! Caller identity for the HTTP surface.
//!
//! Authentication itself -- issuing and validating credentials -- lives
//! outside this crate: no login/JWT/bcrypt here. What this crate needs is
//! an already-authenticated identity attached to the request via an
//! extractor, so handlers never see a missing identity as anything other
//! than a clean 401.

pub mod middleware;

pub use middleware::{auth_middleware, AuthError, CallerId};
