//! Architectural Enforcement
//!
//! Source scanners backing the workspace's architectural tests. The relay
//! is a live streaming path: one blocking call inside an async handler
//! stalls every connection on that worker thread.
//!
//! Blocking calls are tolerated in non-async functions (configuration is
//! loaded before the runtime serves requests) and in `#[cfg(test)]` code.

use std::fs;
use std::path::{Path, PathBuf};

/// Blocking patterns and what they are
pub const FORBIDDEN_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::TcpStream", "Blocking network I/O"),
    ("std::net::TcpListener", "Blocking network I/O"),
    ("std::net::UdpSocket", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::thread::sleep", "Blocking sleep"),
    ("std::io::stdin()", "Blocking stdin"),
];

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["relay/core/src", "relay/daemon/src"];

/// One offending line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line_number: usize,
    /// Pattern description
    pub kind: &'static str,
    /// Offending line, trimmed
    pub line: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line_number,
            self.kind,
            self.line
        )
    }
}

/// Workspace root, derived from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from("../.."))
}

/// Scan every `.rs` file under `dir`
#[must_use]
pub fn scan_directory(dir: &Path) -> Vec<Violation> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .flat_map(|e| {
            let path = e.path().to_path_buf();
            fs::read_to_string(&path)
                .map(|content| scan_source(&path, &content))
                .unwrap_or_default()
        })
        .collect()
}

/// Scan one file's contents
#[must_use]
pub fn scan_source(path: &Path, content: &str) -> Vec<Violation> {
    let lines: Vec<&str> = content.lines().collect();
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        // test modules sit at the bottom of each file
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }

        let code = line.split("//").next().unwrap_or(line);
        let Some((_, kind)) = FORBIDDEN_PATTERNS
            .iter()
            .find(|(pattern, _)| code.contains(pattern))
        else {
            continue;
        };

        if is_in_non_async_function(&lines, idx) {
            continue;
        }

        violations.push(Violation {
            path: path.to_path_buf(),
            line_number: idx + 1,
            kind,
            line: line.trim().to_string(),
        });
    }

    violations
}

/// Function signature on this line, if any, and whether it is async
fn fn_signature(line: &str) -> Option<bool> {
    let mut rest = line.trim();
    for prefix in ["pub(crate) ", "pub(super) ", "pub "] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    if rest.starts_with("async fn ") {
        Some(true)
    } else if rest.starts_with("fn ") || rest.starts_with("const fn ") {
        Some(false)
    } else {
        None
    }
}

/// Whether the closest enclosing function above `current_idx` is sync
#[must_use]
pub fn is_in_non_async_function(lines: &[&str], current_idx: usize) -> bool {
    for line in lines[..current_idx].iter().rev() {
        if let Some(is_async) = fn_signature(line) {
            return !is_async;
        }

        let trimmed = line.trim();
        if trimmed.starts_with("mod ") || trimmed.starts_with("pub mod ") {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_function_is_flagged() {
        let code = "async fn bad() {\n    std::thread::sleep(d);\n}\n";
        let found = scan_source(Path::new("a.rs"), code);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line_number, 2);
        assert_eq!(found[0].kind, "Blocking sleep");
    }

    #[test]
    fn test_sync_function_is_allowed() {
        let code = "pub fn load() {\n    let s = std::fs::read_to_string(p);\n}\n";
        assert!(scan_source(Path::new("a.rs"), code).is_empty());
    }

    #[test]
    fn test_pub_async_method_is_flagged() {
        let code = "impl X {\n    pub async fn get(&self) {\n        reqwest::blocking::get(u);\n    }\n}\n";
        assert_eq!(scan_source(Path::new("a.rs"), code).len(), 1);
    }

    #[test]
    fn test_test_module_is_skipped() {
        let code = "#[cfg(test)]\nmod tests {\n    async fn t() { std::thread::sleep(d); }\n}\n";
        assert!(scan_source(Path::new("a.rs"), code).is_empty());
    }

    #[test]
    fn test_comments_are_ignored() {
        let code = "async fn ok() {\n    // std::thread::sleep is forbidden here\n}\n";
        assert!(scan_source(Path::new("a.rs"), code).is_empty());
    }

    #[test]
    fn test_socket_addr_is_allowed() {
        let code = "async fn ok() {\n    let a: std::net::SocketAddr = s.parse()?;\n}\n";
        assert!(scan_source(Path::new("a.rs"), code).is_empty());
    }
}
