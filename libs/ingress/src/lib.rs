//! Process-global ingress multiplexers.
//!
//! Each mux owns a scarce resource (a listening port or an informer) and
//! fans external events in to the runner registered under the matching
//! fingerprint. Registries map `fingerprint -> event sender`; the sender is
//! a relation, not an ownership link: unregister never closes the channel.

pub mod cloud_events;
pub mod http;
pub mod k8s_events;
pub mod proxy;

use serde::Serialize;

/// JSON error body returned by the ingress listeners.
#[derive(Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub msg: String,
}
