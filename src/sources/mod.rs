//! Upstream source integration
//!
//! `xtream` speaks the de-facto streaming-panel HTTP API shared by provider
//! backends; `credentials` derives per-source API credentials from the
//! records the admin CRUD stores.

pub mod credentials;
pub mod xtream;

pub use credentials::XtreamCredentials;
pub use xtream::XtreamClient;
