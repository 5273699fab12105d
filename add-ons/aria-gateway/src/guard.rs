//! ContentGuard — synchronous text-safety check on completed transcripts.
//!
//! Invoked by the relay on terminal transcript events. A flagged verdict
//! never suppresses the spoken reply; it only produces the
//! `moderation.flagged` side-channel event for external handling.

/// Outcome of one analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardVerdict {
    pub safe: bool,
    pub flags: Vec<String>,
}

impl GuardVerdict {
    pub fn safe() -> Self {
        Self {
            safe: true,
            flags: Vec::new(),
        }
    }
}

/// Collaborator interface consumed by the relay. Implementations must be
/// fast: the call happens inline on the pump.
pub trait ContentGuard: Send + Sync {
    fn analyze(&self, text: &str) -> GuardVerdict;
}

/// Placeholder guard: everything is safe. Use when no guard is configured.
#[derive(Debug, Default)]
pub struct PlaceholderGuard;

impl ContentGuard for PlaceholderGuard {
    fn analyze(&self, _text: &str) -> GuardVerdict {
        GuardVerdict::safe()
    }
}

/// Case-insensitive term matcher. Terms come from `ARIA_GUARD_TERMS`
/// (comma-separated); each matched term becomes a flag.
#[derive(Debug, Default)]
pub struct KeywordGuard {
    terms: Vec<String>,
}

impl KeywordGuard {
    pub fn new(terms: Vec<String>) -> Self {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Build from `ARIA_GUARD_TERMS`. Empty or unset means no terms, which
    /// behaves like [`PlaceholderGuard`].
    pub fn from_env() -> Self {
        let terms = std::env::var("ARIA_GUARD_TERMS")
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        Self::new(terms)
    }
}

impl ContentGuard for KeywordGuard {
    fn analyze(&self, text: &str) -> GuardVerdict {
        let lowered = text.to_lowercase();
        let flags: Vec<String> = self
            .terms
            .iter()
            .filter(|t| lowered.contains(t.as_str()))
            .cloned()
            .collect();
        GuardVerdict {
            safe: flags.is_empty(),
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_flags_nothing() {
        let v = PlaceholderGuard.analyze("anything at all");
        assert!(v.safe);
        assert!(v.flags.is_empty());
    }

    #[test]
    fn keyword_guard_matches_case_insensitively() {
        let guard = KeywordGuard::new(vec!["Forbidden".into(), "secret".into()]);
        let v = guard.analyze("this mentions a FORBIDDEN topic");
        assert!(!v.safe);
        assert_eq!(v.flags, vec!["forbidden".to_string()]);
    }

    #[test]
    fn empty_term_list_is_always_safe() {
        let guard = KeywordGuard::new(vec!["  ".into(), "".into()]);
        assert!(guard.analyze("whatever").safe);
    }
}
