use std::collections::HashSet;

/// Static allow-list of trusted host origins.
///
/// Matching is exact string equality; there is no wildcard syntax, so an
/// entry of `*` only matches a sender whose origin is literally `*`.
#[derive(Debug, Clone, Default)]
pub struct OriginValidator {
    allowed: HashSet<String>,
}

impl OriginValidator {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed = origins
            .into_iter()
            .map(Into::into)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self { allowed }
    }

    /// Parse a comma separated list such as
    /// `https://app.example.com,https://admin.example.com`.
    pub fn from_csv(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed.contains(origin)
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_only() {
        let v = OriginValidator::from_csv("https://host.example.com, https://other.example.com");
        assert_eq!(v.len(), 2);
        assert!(v.is_allowed("https://host.example.com"));
        assert!(v.is_allowed("https://other.example.com"));
        assert!(!v.is_allowed("https://host.example.com/"));
        assert!(!v.is_allowed("http://host.example.com"));
        assert!(!v.is_allowed("https://evil.host.example.com"));
        assert!(!v.is_allowed(""));
    }

    #[test]
    fn wildcard_is_literal() {
        let v = OriginValidator::from_csv("*");
        assert!(!v.is_allowed("https://anything.example.com"));
        assert!(v.is_allowed("*"));
    }

    #[test]
    fn empty_list_denies_everything() {
        let v = OriginValidator::from_csv(" , ,");
        assert!(v.is_empty());
        assert!(!v.is_allowed("https://host.example.com"));
    }
}
