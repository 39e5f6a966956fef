//! Proposal validation.
//!
//! Per-file checks before anything touches a sandbox: path hygiene,
//! non-empty code, structural sanity for Rust sources, import resolution
//! against a declared crate manifest, and async discipline. A handful of
//! mechanical fixes are applied in place when they are unambiguous.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::types::{FileChange, Proposal};

/// Extensions a proposal may touch.
const ALLOWED_EXTENSIONS: [&str; 8] = ["rs", "toml", "md", "json", "yaml", "yml", "txt", "sql"];

/// Import roots that always resolve.
const BUILTIN_ROOTS: [&str; 5] = ["std", "core", "alloc", "crate", "super"];

/// Known blocking calls that must not appear inside async functions, with
/// their async replacements.
const BLOCKING_IN_ASYNC: [(&str, &str); 2] = [
    ("std::thread::sleep", "tokio::time::sleep"),
    ("reqwest::blocking::Client", "reqwest::Client"),
];

/// Outcome of a validation pass.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Human-readable notes for fixes that were applied in place.
    pub fixes_applied: Vec<String>,
}

/// Validates proposals against a declared crate manifest.
#[derive(Debug, Clone)]
pub struct ProposalValidator {
    known_crates: BTreeSet<String>,
}

impl ProposalValidator {
    pub fn new(known_crates: impl IntoIterator<Item = String>) -> Self {
        let known_crates: BTreeSet<String> = known_crates.into_iter().collect();
        info!(crates = known_crates.len(), "proposal validator initialized");
        Self { known_crates }
    }

    /// The manifest used by the stock deployment.
    pub fn with_default_manifest() -> Self {
        Self::new(
            [
                "tokio", "serde", "serde_json", "tracing", "thiserror", "chrono", "uuid",
                "regex", "futures", "axum", "redis", "reqwest",
            ]
            .into_iter()
            .map(String::from),
        )
    }

    /// Validate without mutating.
    pub fn validate(&self, proposal: &Proposal) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if proposal.files.is_empty() {
            errors.push("proposal changes no files".to_string());
        }

        for (index, file) in proposal.files.iter().enumerate() {
            self.validate_file(file, index, &mut errors, &mut warnings);
        }

        ValidationReport {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            fixes_applied: Vec::new(),
        }
    }

    /// Validate, applying the mechanical fixes first. The proposal's file
    /// contents may be rewritten.
    pub fn validate_and_fix(&self, proposal: &mut Proposal) -> ValidationReport {
        let mut fixes = Vec::new();

        // Drop empty files instead of failing the whole proposal on them.
        let before = proposal.files.len();
        proposal.files.retain(|f| !f.code.trim().is_empty());
        if proposal.files.len() < before {
            fixes.push(format!(
                "removed {} empty file(s)",
                before - proposal.files.len()
            ));
        }

        for file in &mut proposal.files {
            if !file.path.ends_with(".rs") {
                continue;
            }
            for (blocking, replacement) in BLOCKING_IN_ASYNC {
                if file.code.contains("async fn") && file.code.contains(blocking) {
                    file.code = file.code.replace(blocking, replacement);
                    fixes.push(format!(
                        "replaced {blocking} with {replacement} in {}",
                        file.path
                    ));
                }
            }
            if let Some(import) = missing_wellknown_import(&file.code) {
                file.code = format!("{import}\n{}", file.code);
                fixes.push(format!("injected `{import}` into {}", file.path));
            }
        }

        let mut report = self.validate(proposal);
        report.fixes_applied = fixes;
        report
    }

    fn validate_file(
        &self,
        file: &FileChange,
        index: usize,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) {
        let path = &file.path;

        if path.is_empty() || path == "unknown" {
            errors.push(format!("file {index}: missing path"));
            return;
        }
        if path.starts_with('/') || path.starts_with('\\') {
            errors.push(format!("file {index} ({path}): path must be project-relative"));
        }
        if path.split(['/', '\\']).any(|part| part == "..") {
            errors.push(format!("file {index} ({path}): path traversal is not allowed"));
        }
        let extension_ok = path
            .rsplit_once('.')
            .is_some_and(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext));
        if !extension_ok {
            errors.push(format!("file {index} ({path}): extension not in allow-list"));
        }

        if file.code.trim().is_empty() {
            errors.push(format!("file {index} ({path}): code is empty"));
            return;
        }

        if path.ends_with(".rs") {
            self.validate_rust(file, errors, warnings);
        }
    }

    fn validate_rust(
        &self,
        file: &FileChange,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) {
        let path = &file.path;

        if let Some(problem) = unbalanced_delimiters(&file.code) {
            errors.push(format!("file {path}: syntax error, unbalanced {problem}"));
            return;
        }

        for root in import_roots(&file.code) {
            let resolves = BUILTIN_ROOTS.contains(&root.as_str())
                || self.known_crates.contains(&root)
                || root == "self";
            if !resolves {
                errors.push(format!(
                    "file {path}: unresolved import, crate `{root}` is not declared"
                ));
            }
        }

        if file.code.contains("async fn") {
            for (blocking, replacement) in BLOCKING_IN_ASYNC {
                if file.code.contains(blocking) {
                    errors.push(format!(
                        "file {path}: blocking call `{blocking}` in async region, use `{replacement}`"
                    ));
                }
            }
        }

        if file.code.contains(".unwrap()") {
            warnings.push(format!("file {path}: unwrap() in proposed code"));
        }

        debug!(path, "rust file validated");
    }
}

/// First unbalanced delimiter class, if any. String and line-comment
/// contents are skipped; this is a structural sanity check, not a parser.
fn unbalanced_delimiters(code: &str) -> Option<&'static str> {
    let mut depths = [0i32; 3]; // braces, parens, brackets
    let mut chars = code.chars().peekable();
    let mut in_string = false;
    let mut in_comment = false;

    while let Some(c) = chars.next() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }
        if in_string {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '/' if chars.peek() == Some(&'/') => in_comment = true,
            '\'' => {
                // Char literal or lifetime; skip a possible escaped char.
                if chars.peek() == Some(&'\\') {
                    chars.next();
                }
                chars.next();
                // Only consume the closing quote of a genuine char literal.
                if chars.peek() == Some(&'\'') {
                    chars.next();
                }
            }
            '{' => depths[0] += 1,
            '}' => depths[0] -= 1,
            '(' => depths[1] += 1,
            ')' => depths[1] -= 1,
            '[' => depths[2] += 1,
            ']' => depths[2] -= 1,
            _ => {}
        }
    }

    match depths {
        [b, _, _] if b != 0 => Some("braces"),
        [_, p, _] if p != 0 => Some("parentheses"),
        [_, _, k] if k != 0 => Some("brackets"),
        _ => None,
    }
}

/// Root segments of every `use` declaration.
fn import_roots(code: &str) -> Vec<String> {
    code.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("use "))
        .filter_map(|rest| {
            let root: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            (!root.is_empty()).then_some(root)
        })
        .collect()
}

/// Detect a single unambiguous missing import among well-known types.
fn missing_wellknown_import(code: &str) -> Option<&'static str> {
    const WELL_KNOWN: [(&str, &str); 3] = [
        ("HashMap::", "use std::collections::HashMap;"),
        ("HashSet::", "use std::collections::HashSet;"),
        ("Duration::", "use std::time::Duration;"),
    ];

    let mut candidates = WELL_KNOWN.iter().filter(|(usage, import)| {
        code.contains(usage) && !code.contains(import) && !code.contains(&import[4..import.len() - 1])
    });
    let first = candidates.next();
    // Only inject when exactly one candidate is missing; two or more means
    // the code is too far gone for a mechanical fix.
    match (first, candidates.next()) {
        (Some((_, import)), None) => Some(import),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposals::types::FileAction;

    fn proposal_with(path: &str, code: &str) -> Proposal {
        Proposal::new(
            "test",
            "test proposal",
            vec![FileChange {
                path: path.to_string(),
                action: FileAction::Modify,
                code: code.to_string(),
            }],
            "queen",
        )
    }

    fn validator() -> ProposalValidator {
        ProposalValidator::with_default_manifest()
    }

    #[test]
    fn test_valid_rust_file_passes() {
        let p = proposal_with(
            "svc/cache.rs",
            "use std::collections::HashMap;\n\npub fn get(map: &HashMap<String, u64>, k: &str) -> Option<u64> {\n    map.get(k).copied()\n}\n",
        );
        let report = validator().validate(&p);
        assert!(report.is_valid, "{:?}", report.errors);
    }

    #[test]
    fn test_empty_proposal_invalid() {
        let p = Proposal::new("t", "d", vec![], "queen");
        let report = validator().validate(&p);
        assert!(!report.is_valid);
    }

    #[test]
    fn test_path_traversal_rejected() {
        let p = proposal_with("../etc/passwd.txt", "data");
        let report = validator().validate(&p);
        assert!(report.errors.iter().any(|e| e.contains("traversal")));
    }

    #[test]
    fn test_absolute_path_rejected() {
        let p = proposal_with("/usr/bin/thing.rs", "fn main() {}");
        let report = validator().validate(&p);
        assert!(report.errors.iter().any(|e| e.contains("project-relative")));
    }

    #[test]
    fn test_disallowed_extension() {
        let p = proposal_with("run.sh", "echo hi");
        let report = validator().validate(&p);
        assert!(report.errors.iter().any(|e| e.contains("allow-list")));
    }

    #[test]
    fn test_empty_code_rejected() {
        let p = proposal_with("a.rs", "   \n ");
        let report = validator().validate(&p);
        assert!(report.errors.iter().any(|e| e.contains("empty")));
    }

    #[test]
    fn test_unbalanced_braces_rejected() {
        let p = proposal_with("a.rs", "fn broken() { if true { }");
        let report = validator().validate(&p);
        assert!(report.errors.iter().any(|e| e.contains("unbalanced braces")));
    }

    #[test]
    fn test_braces_in_strings_ignored() {
        let p = proposal_with("a.rs", "fn ok() { let s = \"{{{\"; let _ = s; }");
        let report = validator().validate(&p);
        assert!(report.is_valid, "{:?}", report.errors);
    }

    #[test]
    fn test_undeclared_crate_rejected() {
        let p = proposal_with("a.rs", "use leftpad::pad;\n\nfn f() { pad(); }");
        let report = validator().validate(&p);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("crate `leftpad` is not declared")));
    }

    #[test]
    fn test_blocking_call_in_async_rejected() {
        let p = proposal_with(
            "svc/cache.rs",
            "async fn refresh() {\n    std::thread::sleep(std::time::Duration::from_secs(1));\n}\n",
        );
        let report = validator().validate(&p);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("blocking call")));
    }

    #[test]
    fn test_autofix_replaces_blocking_call() {
        let mut p = proposal_with(
            "svc/cache.rs",
            "async fn refresh() {\n    std::thread::sleep(std::time::Duration::from_secs(1)).await;\n}\n",
        );
        let report = validator().validate_and_fix(&mut p);
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.fixes_applied.iter().any(|f| f.contains("tokio::time::sleep")));
        assert!(p.files[0].code.contains("tokio::time::sleep"));
    }

    #[test]
    fn test_autofix_drops_empty_files() {
        let mut p = Proposal::new(
            "t",
            "d",
            vec![
                FileChange {
                    path: "keep.rs".into(),
                    action: FileAction::Create,
                    code: "fn keep() {}".into(),
                },
                FileChange {
                    path: "drop.rs".into(),
                    action: FileAction::Create,
                    code: "  ".into(),
                },
            ],
            "queen",
        );
        let report = validator().validate_and_fix(&mut p);
        assert!(report.is_valid);
        assert_eq!(p.files.len(), 1);
        assert!(report.fixes_applied[0].contains("removed 1 empty file"));
    }

    #[test]
    fn test_autofix_injects_missing_import() {
        let mut p = proposal_with(
            "a.rs",
            "fn build() -> usize {\n    let m = HashMap::<String, u64>::new();\n    m.len()\n}\n",
        );
        let report = validator().validate_and_fix(&mut p);
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(p.files[0].code.starts_with("use std::collections::HashMap;"));
    }

    #[test]
    fn test_unwrap_warns_without_failing() {
        let p = proposal_with("a.rs", "fn f() { let v: Option<u8> = None; v.unwrap(); }");
        let report = validator().validate(&p);
        assert!(report.is_valid);
        assert!(report.warnings.iter().any(|w| w.contains("unwrap")));
    }
}
