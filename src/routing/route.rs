//! Route strings.

use crate::error::{HubwireError, Result};

/// Route fired when a connection is established.
pub const CONNECT_ROUTE: &str = "__connect";

/// Route fired when a connection closes.
pub const DISCONNECT_ROUTE: &str = "__disconnect";

/// Separator placed between a hub prefix and its routes.
pub const DEFAULT_SEPARATOR: &str = "/";

/// Whether `route` is one of the lifecycle routes.
pub fn is_reserved(route: &str) -> bool {
    route == CONNECT_ROUTE || route == DISCONNECT_ROUTE
}

/// Check that every `separator`-delimited segment of `path` has content.
pub(crate) fn validate(path: &str, separator: &str) -> Result<()> {
    if path.split(separator).any(|segment| segment.trim().is_empty()) {
        return Err(HubwireError::InvalidRoute(format!(
            "'{}' contains an empty segment",
            path
        )));
    }
    Ok(())
}

/// `prefix` + `separator` + `route`.
pub(crate) fn join(prefix: &str, route: &str, separator: &str) -> String {
    let mut joined = String::with_capacity(prefix.len() + separator.len() + route.len());
    joined.push_str(prefix);
    joined.push_str(separator);
    joined.push_str(route);
    joined
}
