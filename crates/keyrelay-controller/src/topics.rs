//! Reserved topic suffixes and routing between them.
//!
//! A resource `R` owns three derived topics:
//!
//! ```text
//! R.subs  requesters publish signed key requests
//! R.reqs  the controller republishes re-authorized requests
//! R.keys  the resource owner answers with wrapped keys
//! ```

/// Suffix of topics carrying key requests from requesters.
pub const SUBS_SUFFIX: &str = ".subs";

/// Suffix of topics carrying re-authorized requests for the resource owner.
pub const REQS_SUFFIX: &str = ".reqs";

/// Suffix of topics carrying key answers.
pub const KEYS_SUFFIX: &str = ".keys";

/// Pattern matching every subscription topic: `(.*\.subs$)`.
pub fn subscription_pattern() -> String {
    format!("(.*{}$)", regex::escape(SUBS_SUFFIX))
}

/// Resource named by a subscription topic.
///
/// `None` if `topic` is not a subscription topic or names no resource.
pub fn subscription_resource(topic: &str) -> Option<&str> {
    topic.strip_suffix(SUBS_SUFFIX).filter(|resource| !resource.is_empty())
}

/// Topic on which re-authorized requests for `resource` are published.
pub fn request_topic(resource: &str) -> String {
    format!("{resource}{REQS_SUFFIX}")
}

/// Topic on which keys for `resource` are published.
pub fn key_topic(resource: &str) -> String {
    format!("{resource}{KEYS_SUFFIX}")
}
