//! Query input, language detection and prompt rendering

use anyhow::{Context, Result, bail};
use std::io::Read;
use std::path::Path;

const SYSTEM_TEMPLATE: &str = include_str!("../prompts/query_system.md");
const USER_TEMPLATE: &str = include_str!("../prompts/query_user.md");

pub const AUTO: &str = "auto";
const CHINESE: &str = "Simplified Chinese";
const ENGLISH: &str = "English";

/// Unicode blocks assigned to the Han script
const HAN_RANGES: &[(char, char)] = &[
    ('\u{2E80}', '\u{2E99}'),
    ('\u{2E9B}', '\u{2EF3}'),
    ('\u{2F00}', '\u{2FD5}'),
    ('\u{3005}', '\u{3005}'),
    ('\u{3007}', '\u{3007}'),
    ('\u{3021}', '\u{3029}'),
    ('\u{3038}', '\u{303B}'),
    ('\u{3400}', '\u{4DBF}'),
    ('\u{4E00}', '\u{9FFF}'),
    ('\u{F900}', '\u{FA6D}'),
    ('\u{FA70}', '\u{FAD9}'),
    ('\u{20000}', '\u{2A6DF}'),
    ('\u{2A700}', '\u{2EBE0}'),
    ('\u{2F800}', '\u{2FA1D}'),
    ('\u{30000}', '\u{323AF}'),
];

/// Rendered system and user messages for one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPrompts {
    pub system: String,
    pub user: String,
}

/// Positional text joined by spaces, or the contents of `file` (`-` for stdin)
/// with trailing line breaks removed. Exactly one source must be given.
pub fn read_input(args: &[String], file: Option<&str>, stdin: impl Read) -> Result<String> {
    match file {
        Some(_) if !args.is_empty() => bail!("input text and -F are mutually exclusive"),
        None if args.is_empty() => bail!("missing input: provide text or -F"),
        None => Ok(args.join(" ")),
        Some("-") => {
            let mut stdin = stdin;
            let mut data = String::new();
            stdin.read_to_string(&mut data).context("read stdin")?;
            Ok(trim_trailing_newlines(&data).to_string())
        }
        Some(path) => {
            let data = std::fs::read_to_string(Path::new(path))
                .with_context(|| format!("read file {path}"))?;
            Ok(trim_trailing_newlines(&data).to_string())
        }
    }
}

fn trim_trailing_newlines(s: &str) -> &str {
    s.trim_end_matches(['\r', '\n'])
}

pub fn contains_han(s: &str) -> bool {
    s.chars()
        .any(|c| HAN_RANGES.iter().any(|&(lo, hi)| (lo..=hi).contains(&c)))
}

/// With both languages on `auto`, Chinese input is translated into English
/// and anything else into Chinese. Explicit values are used as given.
pub fn resolve_languages(input: &str, input_language: &str, output_language: &str) -> (String, String) {
    if input_language == AUTO && output_language == AUTO {
        let (from, to) = if contains_han(input) {
            (CHINESE, ENGLISH)
        } else {
            (ENGLISH, CHINESE)
        };
        return (from.to_string(), to.to_string());
    }
    (input_language.to_string(), output_language.to_string())
}

pub fn build_query_prompts(input: &str, input_language: &str, output_language: &str) -> QueryPrompts {
    let vars = [
        ("{{input}}", input),
        ("{{input_language}}", input_language),
        ("{{output_language}}", output_language),
    ];
    QueryPrompts {
        system: render(SYSTEM_TEMPLATE.trim(), &vars),
        user: render(USER_TEMPLATE.trim(), &vars),
    }
}

/// Single left-to-right pass; substituted text is never rescanned
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find("{{") {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match vars.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push_str("{{");
                rest = &tail[2..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_input_from_args() {
        let args = vec!["hello".to_string(), "world".to_string()];
        assert_eq!(read_input(&args, None, std::io::empty()).unwrap(), "hello world");
    }

    #[test]
    fn test_read_input_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"file input\r\n\n").unwrap();
        let path = file.path().to_str().unwrap();
        assert_eq!(read_input(&[], Some(path), std::io::empty()).unwrap(), "file input");
    }

    #[test]
    fn test_read_input_from_stdin() {
        let stdin = "stdin input\n".as_bytes();
        assert_eq!(read_input(&[], Some("-"), stdin).unwrap(), "stdin input");
    }

    #[test]
    fn test_read_input_missing() {
        let err = read_input(&[], None, std::io::empty()).unwrap_err();
        assert!(err.to_string().contains("missing input"));
    }

    #[test]
    fn test_read_input_conflict() {
        let args = vec!["hello".to_string()];
        let err = read_input(&args, Some("input.txt"), std::io::empty()).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_read_input_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        assert!(read_input(&[], Some(path.to_str().unwrap()), std::io::empty()).is_err());
    }

    #[test]
    fn test_contains_han() {
        assert!(contains_han("你好"));
        assert!(contains_han("mixed 中 text"));
        assert!(contains_han("\u{20000}"));
        assert!(!contains_han("hello"));
        assert!(!contains_han("こんにちは"));
        assert!(!contains_han(""));
    }

    #[test]
    fn test_resolve_languages_auto() {
        assert_eq!(
            resolve_languages("苹果", AUTO, AUTO),
            ("Simplified Chinese".to_string(), "English".to_string())
        );
        assert_eq!(
            resolve_languages("apple", AUTO, AUTO),
            ("English".to_string(), "Simplified Chinese".to_string())
        );
    }

    #[test]
    fn test_resolve_languages_explicit() {
        assert_eq!(
            resolve_languages("apple", "English", "Japanese"),
            ("English".to_string(), "Japanese".to_string())
        );
        assert_eq!(
            resolve_languages("apple", AUTO, "French"),
            ("auto".to_string(), "French".to_string())
        );
    }

    #[test]
    fn test_render_single_pass() {
        let vars = [("{{input}}", "{{output_language}}"), ("{{output_language}}", "English")];
        assert_eq!(
            render("in={{input}} out={{output_language}} {{other}} {{", &vars),
            "in={{output_language}} out=English {{other}} {{"
        );
    }

    #[test]
    fn test_build_query_prompts_fills_placeholders() {
        let prompts = build_query_prompts("apple", "English", "Simplified Chinese");
        assert!(prompts.user.contains("apple"));
        assert!(prompts.user.contains("English"));
        assert!(prompts.system.contains("Simplified Chinese"));
        assert!(!prompts.system.contains("{{"));
        assert!(!prompts.user.contains("{{"));
    }
}
