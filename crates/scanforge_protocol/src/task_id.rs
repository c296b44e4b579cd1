//! Deterministic, idempotency-bearing task ids for the remote queue.
//!
//! A task's id is derived entirely from its content: the same module name,
//! params and namespace always produce the same id, which is what lets the
//! queue's dedup window reject duplicate enqueues without a side table.

use sha2::{Digest, Sha256};

const DEFAULT_NAMESPACE: &str = "ns";

/// Map a string into an id-safe alphabet: ASCII alphanumerics and `-` pass
/// through unchanged; `/` becomes `_-`; `@` and `.` become `_`; a literal
/// `_` is doubled to `__`; anything else becomes `_XXXX`, the rune's code
/// point as lowercase 4-digit hex.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            c if c.is_ascii_alphanumeric() || c == '-' => out.push(c),
            '/' => out.push_str("_-"),
            '@' => out.push('_'),
            '.' => out.push('_'),
            '_' => out.push_str("__"),
            other => out.push_str(&format!("_{:04x}", other as u32)),
        }
    }
    out
}

/// Build a stable task id: `sanitize(name) + "-" + namespace + "-" +
/// sha256(params)[:8]`. An empty `namespace` is replaced with the default
/// `"ns"` segment so the id never contains an empty path component.
pub fn task_id(name: &str, params: &str, namespace: &str) -> String {
    let ns = if namespace.is_empty() {
        DEFAULT_NAMESPACE.to_string()
    } else {
        sanitize(namespace)
    };
    let mut hasher = Sha256::new();
    hasher.update(params.as_bytes());
    let digest = hasher.finalize();
    let hash8 = hex::encode(&digest[..4]);
    format!("{}-{}-{}", sanitize(name), ns, hash8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_stability() {
        assert_eq!(
            task_id("µπΩ/github.com@v2.3.4-ß", "p", ""),
            "_00b5_03c0_03a9_-github_com_v2_3_4-_00df-ns-148de9c5"
        );
    }

    #[test]
    fn sanitize_preserves_safe_chars() {
        assert_eq!(sanitize("abc-123"), "abc-123");
    }

    #[test]
    fn sanitize_doubles_underscore() {
        assert_eq!(sanitize("a_b"), "a__b");
    }

    #[test]
    fn sanitize_maps_slash_at_dot() {
        assert_eq!(sanitize("a/b@c.d"), "a_-b_c_d");
    }

    #[test]
    fn task_id_is_deterministic() {
        assert_eq!(
            task_id("github.com/foo/bar", "x=1", "analysis"),
            task_id("github.com/foo/bar", "x=1", "analysis")
        );
    }
}
