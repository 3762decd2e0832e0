//! Deterministic source discovery for ingestion runs.
//!
//! Walks a repository root and produces file descriptors in strict
//! lexicographic relative-path order, so two walks of byte-identical trees
//! yield byte-identical sequences regardless of filesystem iteration order.

use std::path::Path;

use walkdir::WalkDir;

use crate::errors::{GraphResult, RepoGraphError};
use crate::models::RunWarning;

/// Directories that are never walked, independent of policy.
const IMPLICIT_IGNORED_DIRS: &[&str] = &[".git", ".repograph"];

/// Languages the walker can classify. `Unknown` files still enter the
/// pipeline and fall back to whole-file document extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Markdown,
    Unknown,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Markdown => "markdown",
            Language::Unknown => "unknown",
        }
    }
}

/// Map a relative path to a language by extension.
pub fn detect_language(rel_path: &str) -> Language {
    let ext = Path::new(rel_path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "py" => Language::Python,
        "md" | "markdown" => Language::Markdown,
        _ => Language::Unknown,
    }
}

/// Extension and ignore policy for a walk.
#[derive(Clone, Debug)]
pub struct WalkPolicy {
    /// File extensions (without the dot) admitted into the walk.
    pub extensions: Vec<String>,
    /// Extra ignore globs applied to `/`-normalized relative paths,
    /// in addition to `.gitignore` rules.
    pub ignore_globs: Vec<String>,
    /// Whether to follow symlinks. Cycles are detected and skipped with a
    /// warning either way.
    pub follow_symlinks: bool,
}

impl Default for WalkPolicy {
    fn default() -> Self {
        Self {
            extensions: vec!["py".to_string(), "md".to_string()],
            ignore_globs: Vec::new(),
            follow_symlinks: true,
        }
    }
}

impl WalkPolicy {
    fn admits_extension(&self, rel_path: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let ext = Path::new(rel_path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        self.extensions.iter().any(|e| e.as_str() == ext)
    }
}

/// A discovered source file: relative path, raw bytes, detected language.
#[derive(Clone, Debug)]
pub struct SourceFile {
    /// Path relative to the repository root, `/`-separated.
    pub relative_path: String,
    pub bytes: Vec<u8>,
    pub language: Language,
}

// ---------------------------------------------------------------------------
// Ignore rules (.gitignore subset + policy globs)
// ---------------------------------------------------------------------------

struct IgnoreRule {
    pattern: String,
    directory_only: bool,
}

fn parse_ignore_pattern(raw: &str) -> Option<IgnoreRule> {
    let stripped = raw.trim();
    if stripped.is_empty() || stripped.starts_with('#') {
        return None;
    }
    let directory_only = stripped.ends_with('/');
    let mut pattern = if directory_only {
        stripped[..stripped.len() - 1].to_string()
    } else {
        stripped.to_string()
    };
    if let Some(rest) = pattern.strip_prefix("./") {
        pattern = rest.to_string();
    }
    Some(IgnoreRule {
        pattern,
        directory_only,
    })
}

fn load_ignore_file(path: &Path) -> Vec<IgnoreRule> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return vec![],
    };
    content.lines().filter_map(parse_ignore_pattern).collect()
}

/// Glob match supporting `*` (any run, including empty) and `?` (one char).
/// Greedy with single-star backtracking; linear in the common case.
fn glob_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    let (mut ti, mut pi) = (0usize, 0usize);
    // Last `*` seen and the text position its match currently ends at.
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            ti += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            // Grow the star's span by one character and retry.
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

fn matches_pattern(rel_path: &str, pattern: &str) -> bool {
    glob_match(rel_path, pattern)
        || glob_match(
            Path::new(rel_path)
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_default()
                .as_str(),
            pattern,
        )
}

fn is_ignored(rel_path: &str, is_dir: bool, rules: &[IgnoreRule]) -> bool {
    for rule in rules {
        if rule.directory_only && !is_dir {
            // A directory-only rule still shadows everything beneath it.
            if rel_path.starts_with(&format!("{}/", rule.pattern)) {
                return true;
            }
            continue;
        }
        if matches_pattern(rel_path, &rule.pattern) {
            return true;
        }
        if rel_path.starts_with(&format!("{}/", rule.pattern)) {
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Walk
// ---------------------------------------------------------------------------

/// Walk `root` and return admitted files in lexicographic relative-path
/// order, plus non-fatal warnings (symlink cycles).
///
/// Determinism: the underlying filesystem iteration order is irrelevant;
/// descriptors are collected and sorted by the byte order of their
/// `/`-normalized relative paths before being returned.
pub fn walk(root: &Path, policy: &WalkPolicy) -> GraphResult<(Vec<SourceFile>, Vec<RunWarning>)> {
    if !root.is_dir() {
        return Err(RepoGraphError::Walk(format!(
            "repository root is not a directory: {}",
            root.display()
        )));
    }

    let mut rules = load_ignore_file(&root.join(".gitignore"));
    for raw in &policy.ignore_globs {
        if let Some(rule) = parse_ignore_pattern(raw) {
            rules.push(rule);
        }
    }

    let mut files: Vec<SourceFile> = Vec::new();
    let mut warnings: Vec<RunWarning> = Vec::new();

    // Ignored directories are pruned during descent, not filtered per file,
    // so a rule like `build/` applies at any nesting depth.
    let walker = WalkDir::new(root)
        .follow_links(policy.follow_symlinks)
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if IMPLICIT_IGNORED_DIRS.contains(&name.as_ref()) {
                return false;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            rel.is_empty() || !is_ignored(&rel, true, &rules)
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                // walkdir reports symlink loops as errors carrying the
                // ancestor that closed the cycle; everything else is fatal.
                if err.loop_ancestor().is_some() {
                    let path = err
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    tracing::warn!(path = %path, "symlink cycle skipped");
                    warnings.push(RunWarning::SymlinkCycle { path });
                    continue;
                }
                return Err(RepoGraphError::Walk(err.to_string()));
            }
        };

        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if rel.is_empty() {
            continue;
        }
        if entry.file_type().is_dir() {
            continue;
        }
        if is_ignored(&rel, false, &rules) {
            continue;
        }
        if !policy.admits_extension(&rel) {
            continue;
        }

        let bytes = std::fs::read(entry.path())?;
        let language = detect_language(&rel);
        files.push(SourceFile {
            relative_path: rel,
            bytes,
            language,
        });
    }

    files.sort_by(|a, b| a.relative_path.as_bytes().cmp(b.relative_path.as_bytes()));
    Ok((files, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn detects_languages_by_extension() {
        assert_eq!(detect_language("a/b.py"), Language::Python);
        assert_eq!(detect_language("docs/adr/0001-choice.md"), Language::Markdown);
        assert_eq!(detect_language("Makefile"), Language::Unknown);
    }

    #[test]
    fn walk_is_lexicographic() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "zeta.py", "pass\n");
        write(dir.path(), "alpha/b.py", "pass\n");
        write(dir.path(), "alpha.py", "pass\n");
        let (files, warnings) = walk(dir.path(), &WalkPolicy::default()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        // '.' (0x2e) sorts before '/' (0x2f)
        assert_eq!(paths, vec!["alpha.py", "alpha/b.py", "zeta.py"]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn walk_skips_git_and_honors_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".git/objects/x.py", "pass\n");
        write(dir.path(), ".gitignore", "build/\n*.generated.py\n");
        write(dir.path(), "build/gen.py", "pass\n");
        write(dir.path(), "a.generated.py", "pass\n");
        write(dir.path(), "keep.py", "pass\n");
        let (files, _) = walk(dir.path(), &WalkPolicy::default()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["keep.py"]);
    }

    #[test]
    fn walk_prunes_ignored_directories_at_any_depth() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", "build/\nnode_modules\n");
        write(dir.path(), "build/gen.py", "pass\n");
        write(dir.path(), "src/build/gen.py", "pass\n");
        write(dir.path(), "web/node_modules/pkg/x.py", "pass\n");
        write(dir.path(), "src/app.py", "pass\n");
        let (files, _) = walk(dir.path(), &WalkPolicy::default()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["src/app.py"]);
    }

    #[test]
    fn glob_matcher_handles_star_and_question() {
        assert!(glob_match("a.generated.py", "*.generated.py"));
        assert!(glob_match("abc", "a?c"));
        assert!(glob_match("abc", "*"));
        assert!(glob_match("", "*"));
        assert!(glob_match("a/b/c.py", "a/*/c.py"));
        assert!(!glob_match("abc", "a?"));
        assert!(!glob_match("abc", "b*"));
        assert!(glob_match("aXbYc", "a*b*c"));
        assert!(!glob_match("aXbY", "a*b*c"));
    }

    #[test]
    fn walk_respects_extension_policy() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "pass\n");
        write(dir.path(), "b.rs", "fn main() {}\n");
        write(dir.path(), "notes.md", "# notes\n");
        let policy = WalkPolicy {
            extensions: vec!["py".to_string()],
            ..WalkPolicy::default()
        };
        let (files, _) = walk(dir.path(), &policy).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "a.py");
    }

    #[test]
    fn walk_rejects_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(walk(&missing, &WalkPolicy::default()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn walk_reports_symlink_cycle_as_warning() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pkg/a.py", "pass\n");
        std::os::unix::fs::symlink(dir.path().join("pkg"), dir.path().join("pkg/loop")).unwrap();
        let (files, warnings) = walk(dir.path(), &WalkPolicy::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(matches!(warnings[0], RunWarning::SymlinkCycle { .. }));
    }
}
