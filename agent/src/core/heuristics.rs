//! Text heuristics used by the command sniffer.

use std::sync::LazyLock;

use regex::{Regex, RegexSet};

static FENCED_SHELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```(?:bash|sh|shell)\s*\n(.*?)\n```").unwrap());

static CHANNEL_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|channel\|>.*?<\|message\|>").unwrap());

static LEFTOVER_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|(?:start|end|call|return|constrain|message)\|>").unwrap());

static LEADING_ASSISTANT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*assistant\s*").unwrap());

static HDL_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        // Verilog / SystemVerilog
        r"\bmodule\s+\w+\s*(?:#\s*)?\(",
        r"\bendmodule\b",
        r"\balways(?:_ff|_comb|_latch)?\s*@",
        r"\balways_(?:ff|comb|latch)\b",
        r"\bassign\s+\w+(?:\s*\[[^\]]*\])?\s*=",
        r"\b(?:input|output|inout)\s+(?:wire|reg|logic)\b",
        r"\b(?:reg|wire|logic)\s*\[\s*\d+\s*:\s*\d+\s*\]",
        r"\b(?:posedge|negedge)\s+\w+",
        // VHDL
        r"(?i)\bentity\s+\w+\s+is\b",
        r"(?i)\barchitecture\s+\w+\s+of\b",
        r"(?i)\bstd_logic(?:_vector)?\b",
        r"(?i)\blibrary\s+ieee\s*;",
    ])
    .unwrap()
});

/// Programs a model typically reaches for when it means to run something.
const SHELL_PROGRAMS: &[&str] = &[
    "awk", "bash", "cargo", "cat", "cd", "chmod", "cp", "curl", "cut", "date", "df", "diff", "du",
    "echo", "env", "export", "file", "find", "gcc", "git", "grep", "head", "iverilog", "jq", "less",
    "ln", "ls", "make", "mkdir", "mv", "node", "npm", "pip", "pip3", "printf", "ps", "pwd",
    "python", "python3", "readlink", "rg", "rm", "sed", "sh", "sort", "stat", "tail", "tar", "test",
    "touch", "tr", "tree", "uname", "uniq", "vvp", "wc", "wget", "which", "whoami", "xargs",
    "yosys", "zsh",
];

/// Raw text longer than this many lines is not taken as a command.
const MAX_RAW_COMMAND_LINES: usize = 5;

/// Whether `text` reads like hardware-description source rather than a shell
/// invocation.
pub fn looks_like_hdl(text: &str) -> bool {
    HDL_SET.is_match(text)
}

/// Whether free text reads like a shell command line.
///
/// The first word (after an optional `$ ` prompt) must be a known program or
/// a path to an executable, and the text must be short.
pub fn looks_like_shell_command(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || text.lines().count() > MAX_RAW_COMMAND_LINES {
        return false;
    }
    let first_line = text.lines().next().unwrap_or_default();
    let first_line = first_line.strip_prefix("$ ").unwrap_or(first_line);
    let Some(program) = first_line.split_whitespace().next() else {
        return false;
    };
    if program.starts_with("./") || program.starts_with('/') {
        return true;
    }
    SHELL_PROGRAMS.contains(&program)
}

/// Bodies of every fenced block tagged bash/sh/shell, trimmed and joined with
/// newlines. `None` when there are no such blocks.
pub fn fenced_shell_blocks(text: &str) -> Option<String> {
    let blocks: Vec<&str> = FENCED_SHELL_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|body| body.as_str().trim())
        .collect();
    if blocks.is_empty() {
        return None;
    }
    Some(blocks.join("\n"))
}

/// Remove multi-channel protocol markup so plain-text scanning sees only prose.
pub fn strip_protocol_markers(text: &str) -> String {
    let text = CHANNEL_HEADER_RE.replace_all(text, "");
    let text = LEFTOVER_TOKEN_RE.replace_all(&text, "");
    let text = LEADING_ASSISTANT_RE.replace(&text, "");
    text.trim().to_string()
}
