//! Heuristic discovery of the paths a command might affect.
//!
//! Commands are free-form shell text, not a structured AST, so this is
//! best-effort token analysis, not a security boundary. The heuristic is
//! intentionally over-inclusive: it cannot tell a read-only path token
//! (a filename mentioned in an `echo`) from a genuinely mutated one, and
//! it does not try to. Snapshotting an unaffected path is cheap; failing
//! to snapshot an affected one is the failure mode to minimize, hence
//! the recursive-enumeration special case for recursive deletes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Maximum directory depth enumerated for recursive-delete targets.
pub const DEFAULT_ENUM_DEPTH: usize = 5;

static RECURSIVE_DELETE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\brm\s+(?:-[a-z]*r[a-z]*|--recursive)\b").expect("valid idiom regex")
});

/// True if the command contains a recursive-delete idiom.
pub fn is_recursive_delete(command: &str) -> bool {
    RECURSIVE_DELETE.is_match(command)
}

/// Shell operator tokens that are never paths.
const OPERATORS: &[&str] = &[
    "&&", "||", ";", "|", ">", ">>", "<", "<<", "2>", "2>>", "&", "!",
];

/// Determine the affected-path set for a command: all explicit paths,
/// plus path-like command tokens, plus (for recursive deletes) every
/// descendant of any targeted directory up to `max_depth`.
///
/// Returns absolute paths in discovery order, deduplicated, with parent
/// directories ahead of their children.
pub fn affected_paths(
    command: &str,
    working_dir: &Path,
    explicit_paths: &[PathBuf],
    max_depth: usize,
) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let recursive = is_recursive_delete(command);

    let mut push = |path: PathBuf, out: &mut Vec<PathBuf>, seen: &mut HashSet<PathBuf>| {
        if seen.insert(path.clone()) {
            out.push(path);
        }
    };

    let mut candidates: Vec<PathBuf> = Vec::new();
    for path in explicit_paths {
        candidates.push(resolve(path, working_dir));
    }
    for token in command.split_whitespace() {
        if let Some(path) = path_like(token) {
            candidates.push(resolve(&path, working_dir));
        }
    }

    for candidate in candidates {
        push(candidate.clone(), &mut out, &mut seen);
        if recursive && candidate.is_dir() {
            enumerate(&candidate, max_depth, &mut out, &mut seen);
        }
    }

    out
}

/// Interpret a command token as a path if it looks like one: absolute,
/// explicitly relative, home-prefixed, or containing a separator or dot.
/// Flags and shell operators are skipped.
fn path_like(token: &str) -> Option<PathBuf> {
    let trimmed = token.trim_matches(|c| c == '"' || c == '\'');
    if trimmed.is_empty() || trimmed.starts_with('-') {
        return None;
    }
    if OPERATORS.contains(&trimmed) {
        return None;
    }
    if let Some(rest) = trimmed.strip_prefix("~/") {
        return dirs::home_dir().map(|home| home.join(rest));
    }
    if trimmed == "~" {
        return dirs::home_dir();
    }
    let looks_like_path = trimmed.starts_with('/')
        || trimmed.starts_with("./")
        || trimmed.starts_with("../")
        || trimmed.contains('/')
        || trimmed.contains('.');
    looks_like_path.then(|| PathBuf::from(trimmed))
}

fn resolve(path: &Path, working_dir: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    };
    normalize_dots(&joined)
}

/// Lexically remove `.` components and resolve `..` where possible, so
/// `/proj/./build` and `/proj/build` dedupe to the same entry. Does not
/// touch the filesystem.
fn normalize_dots(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut parts: Vec<Component<'_>> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(parts.last(), Some(Component::Normal(_))) {
                    parts.pop();
                } else {
                    parts.push(comp);
                }
            }
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Depth-bounded walk pushing `dir`'s descendants, parents before
/// children, children sorted by name for deterministic entry order.
fn enumerate(
    dir: &Path,
    depth_left: usize,
    out: &mut Vec<PathBuf>,
    seen: &mut HashSet<PathBuf>,
) {
    if depth_left == 0 {
        return;
    }
    let Ok(read) = std::fs::read_dir(dir) else {
        return;
    };
    let mut children: Vec<PathBuf> = read.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    children.sort();
    for child in children {
        let is_dir = child.is_dir();
        if seen.insert(child.clone()) {
            out.push(child.clone());
        }
        if is_dir {
            enumerate(&child, depth_left - 1, out, seen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn test_recursive_delete_idiom() {
        assert!(is_recursive_delete("rm -rf ./build"));
        assert!(is_recursive_delete("rm -fr build"));
        assert!(is_recursive_delete("rm --recursive build"));
        assert!(!is_recursive_delete("rm build.log"));
        assert!(!is_recursive_delete("cargo build"));
    }

    #[test]
    fn test_flags_and_operators_are_not_paths() {
        assert!(path_like("-rf").is_none());
        assert!(path_like("--force").is_none());
        assert!(path_like("&&").is_none());
        assert!(path_like(">").is_none());
    }

    #[test]
    fn test_path_like_tokens() {
        assert_eq!(path_like("/etc/hosts"), Some(PathBuf::from("/etc/hosts")));
        assert_eq!(path_like("./build"), Some(PathBuf::from("./build")));
        assert_eq!(path_like("a.txt"), Some(PathBuf::from("a.txt")));
        assert_eq!(path_like("src/main.rs"), Some(PathBuf::from("src/main.rs")));
        assert!(path_like("hello").is_none());
    }

    #[test]
    fn test_quoted_tokens_are_stripped() {
        assert_eq!(path_like("\"a.txt\""), Some(PathBuf::from("a.txt")));
        assert_eq!(path_like("'./build'"), Some(PathBuf::from("./build")));
    }

    #[test]
    fn test_relative_paths_resolve_against_working_dir() {
        let paths = affected_paths("touch a.txt", Path::new("/proj"), &[], DEFAULT_ENUM_DEPTH);
        assert_eq!(paths, vec![PathBuf::from("/proj/a.txt")]);
    }

    #[test]
    fn test_explicit_paths_come_first() {
        let paths = affected_paths(
            "touch b.txt",
            Path::new("/proj"),
            &[PathBuf::from("a.txt")],
            DEFAULT_ENUM_DEPTH,
        );
        assert_eq!(
            paths,
            vec![PathBuf::from("/proj/a.txt"), PathBuf::from("/proj/b.txt")]
        );
    }

    #[test]
    fn test_duplicates_are_removed() {
        let paths = affected_paths(
            "cp a.txt a.txt",
            Path::new("/proj"),
            &[PathBuf::from("a.txt")],
            DEFAULT_ENUM_DEPTH,
        );
        assert_eq!(paths, vec![PathBuf::from("/proj/a.txt")]);
    }

    #[test]
    fn test_dot_components_normalize() {
        let paths = affected_paths("rm ./build/./a.txt", Path::new("/proj"), &[], 5);
        assert_eq!(paths, vec![PathBuf::from("/proj/build/a.txt")]);
    }

    #[test]
    fn test_recursive_delete_enumerates_descendants() {
        let tmp = tempfile::tempdir().unwrap();
        let build = tmp.path().join("build");
        fs::create_dir_all(build.join("b")).unwrap();
        fs::write(build.join("a.txt"), "a").unwrap();
        fs::write(build.join("b").join("c.txt"), "c").unwrap();

        let paths = affected_paths("rm -rf ./build", tmp.path(), &[], DEFAULT_ENUM_DEPTH);
        assert_eq!(
            paths,
            vec![
                build.clone(),
                build.join("a.txt"),
                build.join("b"),
                build.join("b").join("c.txt"),
            ]
        );
    }

    #[test]
    fn test_enumeration_depth_is_bounded() {
        let tmp = tempfile::tempdir().unwrap();
        let mut dir = tmp.path().join("d");
        for _ in 0..4 {
            dir = dir.join("n");
        }
        fs::create_dir_all(&dir).unwrap();

        // Depth 2: d and d/n are listed, deeper levels are not.
        let paths = affected_paths("rm -rf ./d", tmp.path(), &[], 2);
        assert!(paths.contains(&tmp.path().join("d")));
        assert!(paths.contains(&tmp.path().join("d").join("n")));
        assert!(!paths.contains(&tmp.path().join("d").join("n").join("n").join("n")));
    }

    #[test]
    fn test_non_recursive_command_does_not_enumerate() {
        let tmp = tempfile::tempdir().unwrap();
        let build = tmp.path().join("build");
        fs::create_dir_all(&build).unwrap();
        fs::write(build.join("a.txt"), "a").unwrap();

        let paths = affected_paths("ls ./build", tmp.path(), &[], DEFAULT_ENUM_DEPTH);
        assert_eq!(paths, vec![build]);
    }

    #[test]
    fn test_missing_paths_still_listed() {
        // Absence is a valid captured state; discovery never drops a
        // candidate just because it does not exist.
        let paths = affected_paths("cat ./no/such.txt", Path::new("/proj"), &[], 5);
        assert_eq!(paths, vec![PathBuf::from("/proj/no/such.txt")]);
    }
}
