//! Scheduler identifier naming
//!
//! Node names are free-form strings; scheduler task and procedure names are
//! not. Everything outside `[A-Za-z0-9_]` is replaced with `_`. Leading digits
//! and identifier length are left to the scheduler to reject.

/// Replace every character outside `[A-Za-z0-9_]` with `_`
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Sanitize and upper-case, used for root task and procedure names
pub fn sanitize_upper(name: &str) -> String {
    sanitize(name).to_ascii_uppercase()
}

/// Whether a name is already a legal task identifier
pub fn is_sanitized(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
