//! Error taxonomy.
//!
//! Only failures a caller can act on are errors. Invalid lifecycle transitions
//! (suspending a unit that is not running, resuming one that is not suspended)
//! are logged with `tracing::warn!` and leave state unchanged instead.

/// Errors returned by units and the keyed entry point.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A suspended or unmounted unit was read before it ever produced a value
    /// and no default value is configured.
    #[error(
        "unit `{key}` has no value: invoke it at least once before `suspend()` or `unmount()`, \
         or configure a default value"
    )]
    Unresolved {
        /// Identity key of the unit.
        key: String,
    },

    /// The keyed entry point already holds a unit for `key` whose argument or
    /// result type differs from the one requested.
    #[error("key `{key}` is already bound to a unit of a different type")]
    TypeMismatch {
        /// Directory key that was requested.
        key: String,
    },
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_message_names_the_unit_and_the_fix() {
        let err = Error::Unresolved {
            key: "pagination".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("`pagination`"));
        assert!(msg.contains("default value"));
        assert!(msg.contains("at least once"));
    }
}
