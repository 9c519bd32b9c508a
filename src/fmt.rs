//! Debug formatting helpers for [`custom_debug_derive`].

use std::fmt;

/// Prints a secret as `"***"` (or `""` when empty) so configs and sinks can be
/// logged with `{:?}` without leaking credentials.
///
/// Use with `#[debug(with = crate::fmt::redacted)]`.
pub fn redacted<S: AsRef<str>>(value: &S, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if value.as_ref().is_empty() {
        f.write_str("\"\"")
    } else {
        f.write_str("\"***\"")
    }
}

/// [`redacted`] for optional secrets.
pub fn redacted_opt<S: AsRef<str>>(value: &Option<S>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Some(secret) => {
            f.write_str("Some(")?;
            redacted(secret, f)?;
            f.write_str(")")
        }
        None => f.write_str("None"),
    }
}

#[cfg(test)]
mod tests {
    use custom_debug_derive::Debug;

    #[derive(Debug)]
    struct Credentials {
        user: String,
        #[debug(with = super::redacted)]
        token: String,
        #[debug(with = super::redacted_opt)]
        fallback: Option<String>,
    }

    #[test]
    fn secrets_are_masked() {
        let creds = Credentials {
            user: "alice".to_string(),
            token: "hunter2".to_string(),
            fallback: None,
        };
        let out = format!("{creds:?}");
        assert!(out.contains("alice"));
        assert!(!out.contains("hunter2"));
        assert!(out.contains("token: \"***\""), "{out}");
        assert!(out.contains("fallback: None"), "{out}");
    }
}
