//! Platform adapter interface for taviblockd
//!
//! The enforcement core never scripts a browser or signals a process
//! directly; it drives this capability set. Platform-specific
//! implementations live outside the core, and the test suites use
//! [`MockPlatform`].

mod mock;
mod null;
mod traits;

pub use mock::*;
pub use null::*;
pub use traits::*;

/// Whether a tab's URL host belongs to a blocked domain.
///
/// Only the exact domain and its `www.` alias match; other subdomains never
/// trigger tab closing.
pub fn host_matches(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    match host.strip_prefix("www.") {
        Some(rest) => rest == domain,
        None => false,
    }
}
