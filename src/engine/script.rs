//! Build-script scanning.
//!
//! Recognises the handful of commands the filesystem engine needs to build a
//! project model. Everything else in a script is ignored.

use lazy_static::lazy_static;
use regex::Regex;

use super::model::TargetType;

/// Commands the scanner understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Project,
    AddExecutable,
    AddLibrary,
    AddSubdirectory,
    Include,
}

/// A command detection pattern
#[derive(Debug, Clone)]
struct CommandPattern {
    command: Command,
    pattern: &'static str,
}

static COMMAND_PATTERNS: &[CommandPattern] = &[
    CommandPattern {
        command: Command::Project,
        pattern: r"(?is)\bproject\s*\(([^)]*)\)",
    },
    CommandPattern {
        command: Command::AddExecutable,
        pattern: r"(?is)\badd_executable\s*\(([^)]*)\)",
    },
    CommandPattern {
        command: Command::AddLibrary,
        pattern: r"(?is)\badd_library\s*\(([^)]*)\)",
    },
    CommandPattern {
        command: Command::AddSubdirectory,
        pattern: r"(?is)\badd_subdirectory\s*\(([^)]*)\)",
    },
    CommandPattern {
        command: Command::Include,
        pattern: r"(?is)\binclude\s*\(([^)]*)\)",
    },
];

lazy_static! {
    static ref COMMAND_REGEX: Vec<(Regex, &'static CommandPattern)> = {
        COMMAND_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p.pattern).ok().map(|r| (r, p)))
            .collect()
    };
}

const EXECUTABLE_FLAGS: &[&str] = &["WIN32", "MACOSX_BUNDLE", "EXCLUDE_FROM_ALL"];

/// A target declared in a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTarget {
    /// Target name
    pub name: String,
    /// Target kind
    pub target_type: TargetType,
    /// Sources as written
    pub sources: Vec<String>,
}

/// Everything a single script declares, in source order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptSummary {
    /// Name from `project()`, if present
    pub project: Option<String>,
    /// Declared targets
    pub targets: Vec<ScriptTarget>,
    /// Directories from `add_subdirectory()`
    pub subdirectories: Vec<String>,
    /// Script files from `include()`; module names without `.cmake` are skipped
    pub includes: Vec<String>,
}

/// Scan one script.
pub fn parse_script(text: &str) -> ScriptSummary {
    let text = strip_comments(text);

    let mut found: Vec<(usize, Command, Vec<String>)> = Vec::new();
    for (regex, pattern) in COMMAND_REGEX.iter() {
        for caps in regex.captures_iter(&text) {
            let (Some(whole), Some(args)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            found.push((whole.start(), pattern.command, tokenize(args.as_str())));
        }
    }
    found.sort_by_key(|(start, _, _)| *start);

    let mut summary = ScriptSummary::default();
    for (_, command, args) in found {
        let Some((first, rest)) = args.split_first() else {
            continue;
        };
        match command {
            Command::Project => {
                if summary.project.is_none() {
                    summary.project = Some(first.clone());
                }
            },
            Command::AddExecutable => {
                if is_non_building(rest) {
                    continue;
                }
                summary.targets.push(ScriptTarget {
                    name: first.clone(),
                    target_type: TargetType::Executable,
                    sources: rest
                        .iter()
                        .filter(|a| !EXECUTABLE_FLAGS.contains(&a.as_str()))
                        .cloned()
                        .collect(),
                });
            },
            Command::AddLibrary => {
                if is_non_building(rest) {
                    continue;
                }
                let (target_type, rest) = match rest.split_first() {
                    Some((kw, tail)) => match TargetType::from_library_keyword(kw) {
                        Some(t) => (t, tail),
                        None => (TargetType::StaticLibrary, rest),
                    },
                    None => (TargetType::StaticLibrary, rest),
                };
                summary.targets.push(ScriptTarget {
                    name: first.clone(),
                    target_type,
                    sources: rest
                        .iter()
                        .filter(|a| a.as_str() != "EXCLUDE_FROM_ALL")
                        .cloned()
                        .collect(),
                });
            },
            Command::AddSubdirectory => summary.subdirectories.push(first.clone()),
            Command::Include => {
                if first.ends_with(".cmake") {
                    summary.includes.push(first.clone());
                }
            },
        }
    }
    summary
}

/// IMPORTED and ALIAS targets have nothing to build
fn is_non_building(args: &[String]) -> bool {
    args.iter().any(|a| a == "IMPORTED" || a == "ALIAS")
}

fn tokenize(args: &str) -> Vec<String> {
    args.split_whitespace()
        .map(|a| a.trim_matches('"').to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

/// Drop `#` line comments outside quoted strings
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let mut in_quotes = false;
        for ch in line.chars() {
            match ch {
                '"' => in_quotes = !in_quotes,
                '#' if !in_quotes => break,
                _ => {},
            }
            out.push(ch);
        }
        out.push('\n');
    }
    out
}
