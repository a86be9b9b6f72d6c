//! rollcall-client — HTTP implementations of the Rollcall service traits.
//!
//! One [`ApiClient`] talks to the attendance backend and implements every
//! service the session workflow consumes.

pub mod api;
mod wire;

pub use api::ApiClient;
