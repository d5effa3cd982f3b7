// meshstore - coordination core for a small distributed file-storage cluster
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Bucket/file/token name validation for the HTTP façade.

/// Accepts only `[A-Za-z0-9.-]`, matching the original's character class.
/// Empty strings are rejected by the caller, not here.
pub fn is_valid_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphanumeric_dot_dash() {
        assert!(is_valid_name("cat.jpg"));
        assert!(is_valid_name("my-file-01"));
    }

    #[test]
    fn rejects_empty_and_path_traversal() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("../etc/passwd"));
        assert!(!is_valid_name("foo/bar"));
        assert!(!is_valid_name("foo bar"));
    }
}
