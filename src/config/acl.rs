//! Access control lists for configuration keys and upload filenames.
//!
//! An ACL is a comma-separated list of glob patterns, each optionally
//! prefixed with `+` (allow, the default) or `-` (deny). Entries are checked
//! in order and the first match wins. A non-empty list that matches nothing
//! denies; an empty list allows everything (no ACL configured).

/// A parsed access control list.
#[derive(Debug, Clone, Default)]
pub struct AccessList {
    entries: Vec<AclEntry>,
}

#[derive(Debug, Clone)]
struct AclEntry {
    allow: bool,
    pattern: String,
}

impl AccessList {
    /// Parse a comma-separated ACL string. Whitespace around entries is
    /// ignored; empty entries are skipped.
    pub fn parse(spec: &str) -> Self {
        let entries = spec
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| match e.as_bytes()[0] {
                b'-' => AclEntry {
                    allow: false,
                    pattern: e[1..].to_string(),
                },
                b'+' => AclEntry {
                    allow: true,
                    pattern: e[1..].to_string(),
                },
                _ => AclEntry {
                    allow: true,
                    pattern: e.to_string(),
                },
            })
            .collect();
        Self { entries }
    }

    /// Check whether `key` passes the list. First matching entry decides;
    /// no match on a non-empty list denies.
    pub fn allows(&self, key: &str) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        for entry in &self.entries {
            if glob_match(&entry.pattern, key) {
                return entry.allow;
            }
        }
        false
    }
}

/// Glob matching with `*` (any run, including empty) and `?` (any single
/// character). Also used for the hidden-files pattern of the file server.
pub fn glob_match(pattern: &str, input: &str) -> bool {
    fn matches(p: &[u8], s: &[u8]) -> bool {
        match p.first() {
            None => s.is_empty(),
            Some(b'*') => matches(&p[1..], s) || (!s.is_empty() && matches(p, &s[1..])),
            Some(b'?') => !s.is_empty() && matches(&p[1..], &s[1..]),
            Some(c) => s.first() == Some(c) && matches(&p[1..], &s[1..]),
        }
    }
    matches(pattern.as_bytes(), input.as_bytes())
}
