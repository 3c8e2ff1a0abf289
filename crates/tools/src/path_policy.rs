//! Shared path blocklist for the filesystem tools.

use crank_core::error::ToolError;

/// Paths no built-in tool should touch, regardless of approvals.
pub fn default_forbidden_paths() -> Vec<String> {
    vec![
        "/etc/shadow".into(),
        "/etc/sudoers".into(),
        "/proc".into(),
        "/sys".into(),
        "~/.ssh".into(),
        "~/.gnupg".into(),
        "~/.aws".into(),
    ]
}

/// Reject paths under a forbidden prefix. `~` prefixes are expanded
/// against `$HOME` before comparison.
pub fn check(tool_name: &str, path: &str, forbidden: &[String]) -> Result<(), ToolError> {
    let home = std::env::var("HOME").unwrap_or_default();
    for prefix in forbidden {
        let expanded = if let Some(rest) = prefix.strip_prefix("~") {
            format!("{home}{rest}")
        } else {
            prefix.clone()
        };
        if !expanded.is_empty() && path.starts_with(&expanded) {
            return Err(ToolError::PermissionDenied {
                tool_name: tool_name.into(),
                reason: format!("Path {path} is under forbidden prefix {prefix}"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_ordinary_paths() {
        assert!(check("file_read", "/tmp/notes.txt", &default_forbidden_paths()).is_ok());
    }

    #[test]
    fn blocks_forbidden_prefix() {
        let err = check("file_read", "/proc/self/environ", &default_forbidden_paths())
            .unwrap_err();
        assert!(err.to_string().contains("forbidden"));
    }

    #[test]
    fn expands_home_prefix() {
        // SAFETY: test-local env mutation
        unsafe { std::env::set_var("HOME", "/home/tester") };
        let err = check(
            "file_read",
            "/home/tester/.ssh/id_rsa",
            &default_forbidden_paths(),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }
}
