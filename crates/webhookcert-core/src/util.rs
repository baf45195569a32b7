//! Small order-preserving helpers shared by SAN host-list assembly and the
//! CA-bundle merge algorithm.
use std::{collections::HashSet, hash::Hash};

/// Removes duplicates while preserving the order of first occurrence.
pub fn remove_dup<T>(items: impl IntoIterator<Item = T>) -> Vec<T>
where
    T: Eq + Hash + Clone,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

/// Normalizes whitespace for byte-for-byte comparisons of PEM blobs: trims
/// each line and drops blank lines, then rejoins with `\n`. Two PEM blobs
/// that only differ in trailing newlines or CRLF vs LF line endings compare
/// equal after this transform.
pub fn normalize_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_dup_nil_to_empty() {
        let items: Vec<&str> = vec![];
        assert_eq!(remove_dup(items), Vec::<&str>::new());
    }

    #[test]
    fn remove_dup_no_dup() {
        assert_eq!(
            remove_dup(["foo", "bar", "foobar"]),
            vec!["foo", "bar", "foobar"]
        );
    }

    #[test]
    fn remove_dup_with_dup() {
        assert_eq!(
            remove_dup(["foo", "bar", "foo", "foobar", "bar", "foobar"]),
            vec!["foo", "bar", "foobar"]
        );
    }

    #[test]
    fn normalize_whitespace_ignores_crlf_and_blank_lines() {
        let a = "-----BEGIN CERTIFICATE-----\r\nAAAA\r\n-----END CERTIFICATE-----\r\n";
        let b = "-----BEGIN CERTIFICATE-----\nAAAA\n\n-----END CERTIFICATE-----\n";
        assert_eq!(normalize_whitespace(a), normalize_whitespace(b));
    }
}
