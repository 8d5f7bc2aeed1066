//! Glob-style key pattern matching (`*` and `?`), byte-oriented so
//! binary keys match the same way the store matches them.

/// Match `key` against a glob `pattern`. `*` matches any run of bytes,
/// `?` matches exactly one byte, everything else is literal.
pub fn glob_match(pattern: &str, key: &[u8]) -> bool {
    let pat = pattern.as_bytes();
    let mut p = 0;
    let mut k = 0;
    let mut star: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pat.len() && (pat[p] == key[k] || pat[p] == b'?') {
            p += 1;
            k += 1;
        } else if p < pat.len() && pat[p] == b'*' {
            star = Some((p, k));
            p += 1;
        } else if let Some((sp, sk)) = star {
            // Backtrack: let the last `*` swallow one more byte.
            p = sp + 1;
            k = sk + 1;
            star = Some((sp, sk + 1));
        } else {
            return false;
        }
    }

    while p < pat.len() && pat[p] == b'*' {
        p += 1;
    }
    p == pat.len()
}
