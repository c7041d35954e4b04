//! Shell command classification
//!
//! Splits a command line into segments (`;`, `|`, `&&`, `||`, `&`) and decides
//! per segment whether it can modify state. Also detects commands that are
//! never allowed to run.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::agent::confirmation::ConfirmationCategory;
use crate::tools::registry::ToolCategory;

static FORK_BOMB_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:").expect("valid regex")
});
static NETWORK_PIPE_TO_SHELL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(curl|wget)\b.*\|\s*(sh|bash)\b").expect("valid regex")
});
static DANGEROUS_REDIRECT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)>\s*/dev/(sd|nvme|vd|xvd|disk)").expect("valid regex"));
/// Redirections that discard or merge output without touching files
static HARMLESS_REDIRECT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d*>>?\s*(/dev/null|&\d)").expect("valid regex"));

const READ_ONLY_COMMANDS: &[&str] = &[
    "ls", "cat", "pwd", "grep", "rg", "egrep", "fgrep", "head", "tail", "wc", "echo", "printf",
    "which", "whoami", "date", "tree", "file", "stat", "du", "df", "printenv", "uname",
    "sort", "uniq", "diff", "cut", "basename", "dirname", "realpath", "id", "hostname", "true",
    "false", "test", "cd", "less", "more", "ps", "uptime", "free",
];

const PACKAGE_MANAGERS: &[&str] = &[
    "apt", "apt-get", "brew", "dnf", "yum", "pacman", "snap", "npm", "yarn", "pnpm", "bun", "pip",
    "pip3", "gem", "pipx", "uv",
];

const SERVICE_MANAGERS: &[&str] = &["systemctl", "service", "launchctl", "rc-service"];

pub(crate) fn split_shell_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut chars = command.chars().peekable();

    while let Some(ch) = chars.next() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }

        match ch {
            '\\' if !in_single => {
                current.push(ch);
                escaped = true;
            }
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(ch);
            }
            ';' | '\n' if !in_single && !in_double => {
                push_segment(&mut segments, &mut current);
            }
            '|' | '&' if !in_single && !in_double => {
                // `2>&1` is a redirection, not a separator
                if ch == '&' && current.ends_with('>') {
                    current.push(ch);
                    continue;
                }
                if matches!(chars.peek(), Some(next) if *next == ch) {
                    let _ = chars.next();
                }
                push_segment(&mut segments, &mut current);
            }
            _ => current.push(ch),
        }
    }

    push_segment(&mut segments, &mut current);
    segments
}

fn push_segment(segments: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
    current.clear();
}

pub(crate) fn tokenize_shell(segment: &str) -> Vec<String> {
    shell_words::split(segment).unwrap_or_else(|_| {
        segment
            .split_whitespace()
            .map(ToString::to_string)
            .collect()
    })
}

fn is_env_assignment(token: &str) -> bool {
    let Some((key, _)) = token.split_once('=') else {
        return false;
    };
    !key.is_empty() && key.chars().all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn strip_env_prefix(tokens: &[String]) -> &[String] {
    let mut idx = 0;
    while idx < tokens.len() && is_env_assignment(&tokens[idx]) {
        idx += 1;
    }
    &tokens[idx..]
}

fn has_unquoted_redirect(segment: &str) -> bool {
    let cleaned = HARMLESS_REDIRECT_PATTERN.replace_all(segment, "");
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for ch in cleaned.chars() {
        if escaped {
            escaped = false;
            continue;
        }

        match ch {
            '\\' if !in_single => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '>' if !in_single && !in_double => return true,
            _ => {}
        }
    }

    false
}

/// Program name of the segment, without path or env assignments
fn program_name(tokens: &[String]) -> Option<String> {
    let first = tokens.first()?;
    let name = first.rsplit('/').next().unwrap_or(first);
    Some(name.to_ascii_lowercase())
}

fn is_read_only_git(subcommand: Option<&str>) -> bool {
    matches!(
        subcommand,
        Some("status")
            | Some("diff")
            | Some("show")
            | Some("log")
            | Some("grep")
            | Some("rev-parse")
            | Some("ls-files")
            | Some("blame")
    )
}

/// Command or process substitution outside single quotes
fn has_command_substitution(segment: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut prev: Option<char> = None;

    for ch in segment.chars() {
        if escaped {
            escaped = false;
            prev = None;
            continue;
        }

        match ch {
            '\\' if !in_single => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '`' if !in_single => return true,
            '(' if !in_single && prev == Some('$') => return true,
            '(' if !in_single && !in_double && matches!(prev, Some('<') | Some('>')) => {
                return true
            }
            _ => {}
        }
        prev = Some(ch);
    }

    false
}

/// Command wrapped by `env [-i] [-u NAME] [-S STRING] [NAME=value]... cmd`
fn env_wrapped_command(args: &[&str]) -> Option<String> {
    let mut idx = 0;
    while idx < args.len() {
        let arg = args[idx];
        if matches!(arg, "-S" | "--split-string") {
            return Some(args[idx + 1..].join(" ")).filter(|rest| !rest.is_empty());
        }
        if let Some(inline) = arg
            .strip_prefix("--split-string=")
            .or_else(|| arg.strip_prefix("-S"))
        {
            let mut rest = vec![inline];
            rest.extend_from_slice(&args[idx + 1..]);
            return Some(rest.join(" "));
        }
        if matches!(arg, "-u" | "--unset" | "-C" | "--chdir") {
            idx += 2;
        } else if arg.starts_with('-') || is_env_assignment(arg) {
            idx += 1;
        } else {
            break;
        }
    }
    let rest = args.get(idx..).filter(|rest| !rest.is_empty())?;
    Some(shell_words::join(rest))
}

fn writes_output_file(program: &str, args: &[&str]) -> bool {
    match program {
        "sort" => args
            .iter()
            .any(|a| *a == "-o" || a.starts_with("--output") || (a.starts_with("-o") && a.len() > 2)),
        "tree" => args.iter().any(|a| *a == "-o"),
        "date" => args.iter().any(|a| *a == "-s" || a.starts_with("--set")),
        _ => false,
    }
}

fn classify_program(tokens: &[String]) -> Option<ConfirmationCategory> {
    let program = program_name(tokens)?;
    let args: Vec<&str> = tokens.iter().skip(1).map(String::as_str).collect();

    if PACKAGE_MANAGERS.contains(&program.as_str()) {
        return Some(ConfirmationCategory::PackageOperations);
    }
    if program == "cargo"
        && matches!(
            args.first().copied(),
            Some("add") | Some("install") | Some("remove") | Some("uninstall") | Some("update")
        )
    {
        return Some(ConfirmationCategory::PackageOperations);
    }
    if SERVICE_MANAGERS.contains(&program.as_str()) {
        let read_only = matches!(
            args.first().copied(),
            Some("status") | Some("is-active") | Some("list-units") | Some("list")
        );
        return (!read_only).then_some(ConfirmationCategory::ServiceOperations);
    }

    if program == "env" {
        return env_wrapped_command(&args).and_then(|wrapped| {
            let tokens = tokenize_shell(&wrapped);
            classify_program(strip_env_prefix(&tokens))
        });
    }

    if program == "git" {
        let subcommand = args.first().map(|s| s.to_ascii_lowercase());
        return (!is_read_only_git(subcommand.as_deref()))
            .then_some(ConfirmationCategory::BashCommands);
    }

    if program == "find" {
        let mutating = args
            .iter()
            .any(|a| matches!(*a, "-delete" | "-exec" | "-execdir" | "-ok" | "-fprint"));
        return mutating.then_some(ConfirmationCategory::BashCommands);
    }

    if READ_ONLY_COMMANDS.contains(&program.as_str()) && !writes_output_file(&program, &args) {
        return None;
    }

    Some(ConfirmationCategory::BashCommands)
}

fn classify_segment(segment: &str) -> Option<ConfirmationCategory> {
    let tokens = tokenize_shell(segment);
    let tokens = strip_env_prefix(&tokens);
    program_name(tokens)?;

    classify_program(tokens).or_else(|| {
        (has_unquoted_redirect(segment) || has_command_substitution(segment))
            .then_some(ConfirmationCategory::BashCommands)
    })
}

/// Category of a whole command line: the most specific mutating category of
/// any segment, or read-only when every segment is.
pub fn classify_command(command: &str) -> ToolCategory {
    let mut found: Option<ConfirmationCategory> = None;
    for segment in split_shell_segments(command) {
        match classify_segment(&segment) {
            Some(ConfirmationCategory::PackageOperations) => {
                return ToolCategory::Mutating(ConfirmationCategory::PackageOperations);
            }
            Some(ConfirmationCategory::ServiceOperations) => {
                found = Some(ConfirmationCategory::ServiceOperations);
            }
            Some(category) => {
                found.get_or_insert(category);
            }
            None => {}
        }
    }
    match found {
        Some(category) => ToolCategory::Mutating(category),
        None => ToolCategory::ReadOnly,
    }
}

fn is_dangerous_rm(tokens: &[String]) -> bool {
    let has_force = tokens
        .iter()
        .skip(1)
        .any(|t| t.starts_with('-') && t.contains('f'));
    let has_recursive = tokens
        .iter()
        .skip(1)
        .any(|t| t.starts_with('-') && (t.contains('r') || t.contains('R')));
    if !(has_force && has_recursive) {
        return false;
    }

    tokens
        .iter()
        .skip(1)
        .filter(|t| !t.starts_with('-'))
        .any(|target| {
            matches!(
                target.as_str(),
                "/" | "/*" | "~" | "~/" | "$HOME" | "$HOME/" | "${HOME}" | "${HOME}/"
            ) || target.starts_with("/etc")
                || target.starts_with("/usr")
                || target.starts_with("/var")
        })
}

fn dangerous_segment_reason(segment: &str) -> Option<&'static str> {
    if FORK_BOMB_PATTERN.is_match(segment) {
        return Some("fork bomb");
    }
    if NETWORK_PIPE_TO_SHELL_PATTERN.is_match(segment) {
        return Some("network script piped to shell");
    }
    if DANGEROUS_REDIRECT_PATTERN.is_match(segment) {
        return Some("raw disk redirection");
    }

    let tokens = tokenize_shell(segment);
    let tokens = strip_env_prefix(&tokens);
    let command = program_name(tokens)?;

    if command == "rm" && is_dangerous_rm(tokens) {
        return Some("destructive rm target");
    }

    if command == "dd"
        && tokens
            .iter()
            .skip(1)
            .any(|t| t.starts_with("of=/dev/") || t.starts_with("if=/dev/"))
    {
        return Some("direct disk access with dd");
    }

    if command.starts_with("mkfs") {
        return Some("filesystem formatting command");
    }

    None
}

/// Reason a command must never run, if any
pub fn dangerous_command_reason(command: &str) -> Option<&'static str> {
    // Patterns spanning separators (fork bombs, pipes) need the whole line
    if FORK_BOMB_PATTERN.is_match(command) {
        return Some("fork bomb");
    }
    if NETWORK_PIPE_TO_SHELL_PATTERN.is_match(command) {
        return Some("network script piped to shell");
    }
    split_shell_segments(command)
        .iter()
        .find_map(|segment| dangerous_segment_reason(segment))
}
