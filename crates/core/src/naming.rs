//! Repository naming convention.
//!
//! Every published repository is named `<name>---<id>`, where `id` is the
//! parent workflow's id when the workflow has one. The suffix after the
//! last separator is how the reaper recovers an identity from a remote
//! repository name.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::WorkflowId;

/// Separator between the sanitized name and the identity suffix.
pub const REPOSITORY_ID_SEPARATOR: &str = "---";

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Build a repository name from a workflow name and identity.
///
/// Single quotes are stripped from the name.
///
/// ```
/// use phenoflow_core::naming::repository_name;
///
/// let id = uuid::Uuid::nil();
/// assert_eq!(
///     repository_name("Crohn's", &id),
///     "Crohns---00000000-0000-0000-0000-000000000000"
/// );
/// ```
pub fn repository_name(name: &str, id: &WorkflowId) -> String {
    format!("{}{REPOSITORY_ID_SEPARATOR}{id}", name.replace('\'', ""))
}

/// Whether a remote repository name follows the `<name>---<id>` convention.
pub fn is_managed_repository(repo_name: &str) -> bool {
    repo_name.contains(REPOSITORY_ID_SEPARATOR)
}

/// Recover the identity suffix from a repository name.
///
/// Returns `None` when the name carries no separator or the suffix is not
/// a valid identity.
pub fn parse_repository_id(repo_name: &str) -> Option<WorkflowId> {
    let idx = repo_name.rfind(REPOSITORY_ID_SEPARATOR)?;
    let suffix = &repo_name[idx + REPOSITORY_ID_SEPARATOR.len()..];
    suffix.parse().ok()
}

/// Remote URL of a repository, used for submodule entries.
pub fn submodule_url(repository_prefix: &str, repo_name: &str) -> String {
    format!("{}/{repo_name}.git", repository_prefix.trim_end_matches('/'))
}

/// Strip markup from an author name before it is stored or matched.
pub fn sanitize_author(user_name: &str) -> String {
    HTML_TAG.replace_all(user_name, "").trim().to_string()
}

/// Lowercase a label and collapse every run of other characters into a
/// single hyphen, for use in step names.
pub fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Key identifying a logical definition: `(name, about, sanitized author)`.
pub fn identity_key(name: &str, about: &str, user_name: &str) -> String {
    format!("{name}\u{1f}{about}\u{1f}{}", sanitize_author(user_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_quotes_and_appends_id() {
        let id: WorkflowId = "6f1c1d3e-4b5a-4c1e-9e57-0d3c2b1a0f00".parse().unwrap();
        assert_eq!(
            repository_name("Alzheimer's 'disease'", &id),
            "Alzheimers disease---6f1c1d3e-4b5a-4c1e-9e57-0d3c2b1a0f00"
        );
    }

    #[test]
    fn parses_suffix_after_last_separator() {
        let id = uuid::Uuid::new_v4();
        let name = repository_name("covid---sub", &id);
        assert_eq!(parse_repository_id(&name), Some(id));
    }

    #[test]
    fn unmanaged_names_yield_no_id() {
        assert!(!is_managed_repository("website"));
        assert_eq!(parse_repository_id("website"), None);
        assert_eq!(parse_repository_id("name---not-a-uuid"), None);
    }

    #[test]
    fn submodule_url_joins_prefix() {
        assert_eq!(
            submodule_url("https://github.com/phenoflow/", "a---1"),
            "https://github.com/phenoflow/a---1.git"
        );
    }

    #[test]
    fn author_markup_is_removed() {
        assert_eq!(sanitize_author("<b>alice</b> "), "alice");
        assert_eq!(sanitize_author("bob"), "bob");
    }

    #[test]
    fn slug_collapses_punctuation() {
        assert_eq!(slug("DISC (Primary Care)"), "disc-primary-care");
        assert_eq!(slug("  i2b2  "), "i2b2");
    }

    #[test]
    fn identity_key_uses_sanitized_author() {
        assert_eq!(
            identity_key("Diabetes", "About", "<i>alice</i>"),
            identity_key("Diabetes", "About", "alice")
        );
        assert_ne!(
            identity_key("Diabetes", "About", "alice"),
            identity_key("Diabetes", "About", "bob")
        );
    }
}
