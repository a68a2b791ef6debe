//! URL algebra for tree nodes.
//!
//! A node's `url` is derived from its `path` (the parent's url, empty for the
//! root) and its `slug`. These helpers are pure string manipulation; the
//! storage layer builds its ancestor queries on top of them.

/// A `(path, slug)` address. The root sentinel is `path == ""` with no slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSlug {
    pub path: String,
    pub slug: Option<String>,
}

impl PathSlug {
    pub fn root() -> Self {
        PathSlug {
            path: String::new(),
            slug: None,
        }
    }
}

/// Compose a node url from its path and slug.
pub fn get_url(path: &str, slug: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if path == "/" {
        format!("/{slug}")
    } else {
        format!("{path}/{slug}")
    }
}

/// Split a url into its parent path and trailing slug.
///
/// `"/"` decomposes to the root sentinel `("", None)`.
pub fn decompose(url: &str) -> PathSlug {
    if url == "/" {
        return PathSlug::root();
    }

    match url.rfind('/') {
        Some(0) => PathSlug {
            path: "/".to_string(),
            slug: Some(url[1..].to_string()),
        },
        Some(idx) => PathSlug {
            path: url[..idx].to_string(),
            slug: Some(url[idx + 1..].to_string()),
        },
        None => PathSlug {
            path: String::new(),
            slug: Some(url.to_string()),
        },
    }
}

/// The parent url of `url`, or `None` when `url` is already the root.
pub fn parent_url(url: &str) -> Option<String> {
    if url == "/" {
        return None;
    }
    match url.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(url[..idx].to_string()),
        None => Some("/".to_string()),
    }
}

/// Ordered `(path, slug)` pairs from the immediate parent up to the root
/// sentinel. For `"/"` this is just the root sentinel itself.
pub fn parents(url: &str) -> Vec<PathSlug> {
    let mut chain = Vec::new();
    if url == "/" {
        chain.push(PathSlug::root());
        return chain;
    }

    let mut current = parent_url(url);
    while let Some(ancestor) = current {
        if ancestor == "/" {
            break;
        }
        chain.push(decompose(&ancestor));
        current = parent_url(&ancestor);
    }
    chain.push(PathSlug::root());

    chain
}
