//! Upstream repository references.
//!
//! Catalogs describe the same GitHub project in many spellings
//! (`https://github.com/o/r.git`, `git@github.com:o/r`, `o/r/`, ...).
//! [`normalize_repo`] folds them onto `owner/name`, which is the key used to
//! deduplicate records and to share enrichment across ecosystems.

use serde::{Deserialize, Serialize};

/// Normalizes a repository reference to `owner/name`.
///
/// Returns `None` for empty input, for URLs pointing at a host other than
/// GitHub and for references without both an owner and a name.
///
/// # Example
///
/// ```
/// use plughub::repo::normalize_repo;
///
/// assert_eq!(
///     normalize_repo("git+https://github.com/acme/widget.git#readme").as_deref(),
///     Some("acme/widget")
/// );
/// assert_eq!(normalize_repo("https://gitlab.com/acme/widget"), None);
/// ```
pub fn normalize_repo(raw: &str) -> Option<String> {
    let mut value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let lower = value.to_lowercase();
    let is_url = lower.contains("://") || lower.starts_with("git@");
    if is_url && !lower.contains("github.com") {
        return None;
    }

    // Query and fragment never belong to the identity.
    if let Some(pos) = value.find(['#', '?']) {
        value = &value[..pos];
    }

    let mut rest = value;
    for prefix in ["git+", "https://", "http://", "ssh://", "git://"] {
        rest = strip_prefix_ignore_case(rest, prefix).unwrap_or(rest);
    }
    for prefix in ["git@github.com:", "git@github.com/", "www.github.com/", "github.com/"] {
        if let Some(stripped) = strip_prefix_ignore_case(rest, prefix) {
            rest = stripped;
            break;
        }
    }

    let mut parts = rest.split('/').filter(|p| !p.is_empty());
    let owner = parts.next()?;
    let name = parts.next()?;
    let name = strip_suffix_ignore_case(name, ".git");

    // GitHub owners never contain dots; a dotted first segment is some
    // other host written without a scheme.
    if owner.is_empty() || name.is_empty() || owner.contains('.') {
        return None;
    }
    if !is_name_segment(owner) || !is_name_segment(name) {
        return None;
    }

    Some(format!("{}/{}", owner, name))
}

/// GitHub owner and repository names are ASCII letters, digits, `-`, `_`
/// and `.`.
fn is_name_segment(segment: &str) -> bool {
    segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        value.get(prefix.len()..)
    } else {
        None
    }
}

fn strip_suffix_ignore_case<'a>(value: &'a str, suffix: &str) -> &'a str {
    let cut = match value.len().checked_sub(suffix.len()) {
        Some(cut) => cut,
        None => return value,
    };
    match (value.get(..cut), value.get(cut..)) {
        (Some(head), Some(tail)) if tail.eq_ignore_ascii_case(suffix) => head,
        _ => value,
    }
}

/// Case-insensitive dedup key for a repository reference.
pub fn repo_key(raw: &str) -> Option<String> {
    normalize_repo(raw).map(|repo| repo.to_lowercase())
}

/// A parsed `owner/name` GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = normalize_repo(raw)?;
        let (owner, name) = normalized.split_once('/')?;
        Some(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Lower-cased `owner/name`, shared by every record pointing here.
    pub fn key(&self) -> String {
        self.full_name().to_lowercase()
    }

    /// Filesystem-safe stem, e.g. `acme__widget`.
    pub fn file_stem(&self) -> String {
        format!("{}__{}", self.owner, self.name)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain() {
        assert_eq!(normalize_repo("acme/widget").as_deref(), Some("acme/widget"));
        assert_eq!(normalize_repo("  acme/widget  ").as_deref(), Some("acme/widget"));
    }

    #[test]
    fn test_normalize_urls() {
        assert_eq!(
            normalize_repo("https://github.com/acme/widget").as_deref(),
            Some("acme/widget")
        );
        assert_eq!(
            normalize_repo("HTTPS://GitHub.com/Acme/Widget.GIT").as_deref(),
            Some("Acme/Widget")
        );
        assert_eq!(
            normalize_repo("git+https://github.com/acme/widget.git").as_deref(),
            Some("acme/widget")
        );
        assert_eq!(
            normalize_repo("git@github.com:acme/widget.git").as_deref(),
            Some("acme/widget")
        );
        assert_eq!(
            normalize_repo("github.com/acme/widget/").as_deref(),
            Some("acme/widget")
        );
        assert_eq!(
            normalize_repo("https://www.github.com/acme/widget").as_deref(),
            Some("acme/widget")
        );
    }

    #[test]
    fn test_normalize_strips_query_fragment_and_subpaths() {
        assert_eq!(
            normalize_repo("https://github.com/acme/widget?tab=readme").as_deref(),
            Some("acme/widget")
        );
        assert_eq!(
            normalize_repo("https://github.com/acme/widget#install").as_deref(),
            Some("acme/widget")
        );
        assert_eq!(
            normalize_repo("https://github.com/acme/widget/tree/main/src").as_deref(),
            Some("acme/widget")
        );
        assert_eq!(normalize_repo("acme/widget//").as_deref(), Some("acme/widget"));
    }

    #[test]
    fn test_normalize_rejects() {
        assert_eq!(normalize_repo(""), None);
        assert_eq!(normalize_repo("   "), None);
        assert_eq!(normalize_repo("widget"), None);
        assert_eq!(normalize_repo("https://github.com/acme"), None);
        assert_eq!(normalize_repo("https://gitlab.com/acme/widget"), None);
        assert_eq!(normalize_repo("git@bitbucket.org:acme/widget.git"), None);
        assert_eq!(normalize_repo("gitlab.com/acme/widget"), None);
        assert_eq!(normalize_repo("aaaé/widget"), None);
        assert_eq!(normalize_repo("acme/éaaa"), None);
        assert_eq!(normalize_repo("https://github.com/acme/widgé"), None);
        assert_eq!(normalize_repo("gité/acme"), None);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_repo("git@github.com:acme/widget.git").unwrap();
        assert_eq!(normalize_repo(&once), Some(once.clone()));
    }

    #[test]
    fn test_repo_key_lowercases() {
        assert_eq!(repo_key("https://github.com/Acme/Widget").as_deref(), Some("acme/widget"));
    }

    #[test]
    fn test_repo_ref() {
        let repo = RepoRef::parse("https://github.com/Acme/my.widget").unwrap();
        assert_eq!(repo.owner, "Acme");
        assert_eq!(repo.name, "my.widget");
        assert_eq!(repo.full_name(), "Acme/my.widget");
        assert_eq!(repo.key(), "acme/my.widget");
        assert_eq!(repo.file_stem(), "Acme__my.widget");
        assert!(RepoRef::parse("nope").is_none());
    }
}
