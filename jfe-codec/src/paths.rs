//! Top-level path matching
//!
//! Paths are configured as `"/name"`. Only direct children of the document
//! root are addressable; nested paths are dropped when the matcher is built.

use ahash::AHashSet;
use smallvec::SmallVec;

/// Immutable set of encryptable top-level property names.
///
/// Built once per operation and shared read-only. Matching compares the
/// UTF-8 bytes of an incoming property name against each candidate, length
/// first, without allocating.
#[derive(Debug, Clone, Default)]
pub struct CandidatePaths {
    candidates: SmallVec<[Box<str>; 8]>,
}

impl CandidatePaths {
    /// Build from configured paths.
    ///
    /// A missing leading `/` is added. Empty paths and paths naming a nested
    /// property are ignored. The root path `"/"` matches the empty property
    /// name.
    pub fn build<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = AHashSet::new();
        let mut candidates: SmallVec<[Box<str>; 8]> = SmallVec::new();

        for path in paths {
            let path = path.as_ref();
            if path.is_empty() {
                continue;
            }

            let normalized = if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{}", path)
            };

            if normalized[1..].contains('/') {
                continue;
            }

            if seen.insert(normalized.clone()) {
                candidates.push(normalized.into_boxed_str());
            }
        }

        candidates.sort_unstable();
        Self { candidates }
    }

    /// Full path (`"/name"`) of the candidate matching `name`.
    pub fn matches(&self, name: &[u8]) -> Option<&str> {
        self.candidates
            .iter()
            .find(|candidate| {
                let bytes = &candidate.as_bytes()[1..];
                bytes.len() == name.len() && bytes == name
            })
            .map(|candidate| &candidate[..])
    }

    /// Number of candidates
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether nothing can match
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Candidates in their deterministic order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(|c| &c[..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_filters() {
        let paths = CandidatePaths::build(["ssn", "/name", "", "/a/b", "/name", "nested/x"]);
        let all: Vec<&str> = paths.iter().collect();
        assert_eq!(all, vec!["/name", "/ssn"]);
    }

    #[test]
    fn matches_exact_names_only() {
        let paths = CandidatePaths::build(["/ssn", "/ss"]);
        assert_eq!(paths.matches(b"ssn"), Some("/ssn"));
        assert_eq!(paths.matches(b"ss"), Some("/ss"));
        assert_eq!(paths.matches(b"s"), None);
        assert_eq!(paths.matches(b"ssnx"), None);
        assert_eq!(paths.matches(b""), None);
    }

    #[test]
    fn root_path_matches_empty_name() {
        let paths = CandidatePaths::build(["/"]);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths.matches(b""), Some("/"));
        assert_eq!(paths.matches(b"x"), None);
    }

    #[test]
    fn utf8_names() {
        let paths = CandidatePaths::build(["/prénom"]);
        assert_eq!(paths.matches("prénom".as_bytes()), Some("/prénom"));
        assert_eq!(paths.matches(b"prenom"), None);
    }

    #[test]
    fn empty_configuration() {
        let paths = CandidatePaths::build(Vec::<String>::new());
        assert!(paths.is_empty());
        assert_eq!(paths.matches(b"anything"), None);
    }
}
