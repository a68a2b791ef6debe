//! Deterministic slug derivation.
//!
//! Slugs are URL-safe identifiers derived from declared source fields:
//! NFKD-fold, strip combining marks, lowercase, collapse every
//! non-alphanumeric run into a single hyphen, trim leading/trailing hyphens.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

pub fn slugify(source: &str) -> String {
    let mut slug = String::with_capacity(source.len());
    let mut pending_separator = false;

    for c in source.nfkd().filter(|c| !is_combining_mark(*c)) {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_hyphenates() {
        assert_eq!(slugify("Task 1"), "task-1");
        assert_eq!(slugify("This is Task 1's description"), "this-is-task-1-s-description");
    }

    #[test]
    fn folds_accents() {
        assert_eq!(slugify("Café Mañana"), "cafe-manana");
    }

    #[test]
    fn collapses_separator_runs() {
        assert_eq!(slugify("a  --  b"), "a-b");
    }

    #[test]
    fn trims_edges() {
        assert_eq!(slugify("  hello!  "), "hello");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(slugify("Grupo Ñandú 2"), slugify("Grupo Ñandú 2"));
    }
}
