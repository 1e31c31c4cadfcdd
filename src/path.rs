//! Path resolution collaborators.
//!
//! Canonical paths are absolute, `/`-separated, relative to the configured
//! base directory, and never end with a separator except for the root `/`.

use crate::error::{VfsError, VfsResult};

const SCHEME: &str = "vfs://";

/// Maps a user-supplied path or URI to its canonical path.
pub trait PathResolver: Send + Sync {
    fn resolve(&self, path: &str) -> VfsResult<String>;
}

/// Children that live outside the store (e.g. on a local disk) and are merged
/// into folder listings. The merge policy belongs to the implementor.
pub trait LocalChildren: Send + Sync {
    fn children(&self, canonical: &str) -> Vec<String>;
}

/// Resolves paths against a fixed base directory.
///
/// Paths under the base are made base-relative; every other path, absolute or
/// not, is taken to be relative to the base already.
#[derive(Debug, Clone)]
pub struct BasePathResolver {
    base: Vec<String>,
}

impl BasePathResolver {
    pub fn new(base: &str) -> Self {
        Self {
            base: normalize(base),
        }
    }
}

impl PathResolver for BasePathResolver {
    fn resolve(&self, path: &str) -> VfsResult<String> {
        let path = path.strip_prefix(SCHEME).unwrap_or(path);
        if path.contains('\u{0}') {
            return Err(VfsError::invalid(format!("path contains NUL: {path:?}")));
        }
        let mut components = normalize(path);
        if !self.base.is_empty() && components.starts_with(&self.base) {
            components.drain(..self.base.len());
        }
        Ok(join(&components))
    }
}

fn normalize(path: &str) -> Vec<String> {
    let mut components: Vec<String> = Vec::new();
    for component in path.split(['/', '\\']) {
        match component {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            c => components.push(c.to_string()),
        }
    }
    components
}

fn join(components: &[String]) -> String {
    if components.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for c in components {
        out.push('/');
        out.push_str(c);
    }
    out
}

/// `/a/b` -> `/a`, `/a` -> `/`, `/` -> `None`.
pub fn parent_path(canonical: &str) -> Option<&str> {
    if canonical == "/" {
        return None;
    }
    match canonical.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&canonical[..i]),
        None => None,
    }
}

/// True when `path` lies strictly below `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return path != "/";
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Rewrites the `from` prefix of a descendant path to `to`.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    let rest = if from == "/" {
        path
    } else {
        &path[from.len()..]
    };
    if to == "/" {
        rest.to_string()
    } else {
        format!("{to}{rest}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_and_absolute() {
        let resolver = BasePathResolver::new("/srv/app");
        assert_eq!(resolver.resolve("docs/a.txt").unwrap(), "/docs/a.txt");
        assert_eq!(resolver.resolve("/srv/app/docs/a.txt").unwrap(), "/docs/a.txt");
        assert_eq!(resolver.resolve("/docs/./b/../a.txt").unwrap(), "/docs/a.txt");
        assert_eq!(resolver.resolve("vfs://docs//a.txt").unwrap(), "/docs/a.txt");
        assert_eq!(resolver.resolve("/srv/app").unwrap(), "/");
        assert_eq!(resolver.resolve("../../..").unwrap(), "/");
        assert!(resolver.resolve("bad\u{0}name").is_err());
    }

    #[test]
    fn test_root_base() {
        let resolver = BasePathResolver::new("/");
        assert_eq!(resolver.resolve("a\\b").unwrap(), "/a/b");
        assert_eq!(resolver.resolve("").unwrap(), "/");
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/a/b"), Some("/a"));
        assert_eq!(parent_path("/a"), Some("/"));
        assert_eq!(parent_path("/"), None);
    }

    #[test]
    fn test_descendant_and_rebase() {
        assert!(is_descendant("/a/b", "/a"));
        assert!(!is_descendant("/ab", "/a"));
        assert!(!is_descendant("/a", "/a"));
        assert!(is_descendant("/a", "/"));
        assert_eq!(rebase("/a/b/c", "/a", "/x"), "/x/b/c");
        assert_eq!(rebase("/a/b", "/a", "/"), "/b");
    }
}
