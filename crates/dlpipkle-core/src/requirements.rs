use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use dlpipkle_resolver::Requirement;
use serde::Serialize;
use tracing::warn;

/// An input entry that was skipped instead of resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputWarning {
    /// `path:line` for file entries, `argument` for command-line entries.
    pub source: String,
    pub input: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedRequirements {
    pub requirements: Vec<Requirement>,
    pub warnings: Vec<InputWarning>,
}

impl ParsedRequirements {
    pub fn extend(&mut self, other: Self) {
        self.requirements.extend(other.requirements);
        self.warnings.extend(other.warnings);
    }

    fn skip(&mut self, source: String, input: &str, message: String) {
        warn!(source = %source, input, "{message}");
        self.warnings.push(InputWarning {
            source,
            input: input.to_string(),
            message,
        });
    }
}

/// Read a requirements file.
///
/// # Errors
/// Returns an error when the file cannot be read. Individual bad lines are
/// reported as warnings instead.
pub fn read_requirements_file(path: &Path) -> Result<ParsedRequirements> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read requirements file {}", path.display()))?;
    Ok(parse_requirement_lines(&path.display().to_string(), &contents))
}

/// Parse requirements-file text: one requirement per line, `#` comments,
/// blank lines ignored. Option lines (`-r`, `--index-url`, ...) are skipped.
#[must_use]
pub fn parse_requirement_lines(label: &str, contents: &str) -> ParsedRequirements {
    let mut parsed = ParsedRequirements::default();
    for (index, raw) in contents.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        let source = format!("{label}:{}", index + 1);
        if line.starts_with('-') {
            parsed.skip(source, line, "requirement file options are not supported".to_string());
            continue;
        }
        match Requirement::parse(line) {
            Ok(requirement) => parsed.requirements.push(requirement),
            Err(err) => parsed.skip(source, line, err.to_string()),
        }
    }
    parsed
}

/// Parse requirement strings given on the command line.
#[must_use]
pub fn parse_requirement_args(args: &[String]) -> ParsedRequirements {
    let mut parsed = ParsedRequirements::default();
    for arg in args {
        let arg = arg.trim();
        if arg.is_empty() {
            continue;
        }
        match Requirement::parse(arg) {
            Ok(requirement) => parsed.requirements.push(requirement),
            Err(err) => parsed.skip("argument".to_string(), arg, err.to_string()),
        }
    }
    parsed
}

// A `#` starts a comment at the beginning of a line or after whitespace.
fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    let bytes = line.as_bytes();
    for (idx, byte) in bytes.iter().enumerate() {
        if *byte == b'#' && idx > 0 && bytes[idx - 1].is_ascii_whitespace() {
            return &line[..idx];
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_lines_with_comments_and_blanks() {
        let parsed = parse_requirement_lines(
            "requirements.txt",
            "# pinned\nrequests==2.31.0  # http\n\n   \nNumPy>=1.26\nflask[async]\n",
        );
        let names: Vec<&str> = parsed
            .requirements
            .iter()
            .map(|req| req.normalized.as_str())
            .collect();
        assert_eq!(names, ["requests", "numpy", "flask"]);
        assert_eq!(parsed.requirements[0].pinned_version().as_deref(), Some("2.31.0"));
        assert_eq!(parsed.requirements[2].extras, ["async"]);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn skips_options_and_malformed_lines() {
        let parsed = parse_requirement_lines(
            "reqs.txt",
            "-r base.txt\n--index-url https://mirror.example\nrequests\n==1.0\n",
        );
        assert_eq!(parsed.requirements.len(), 1);
        let sources: Vec<&str> = parsed.warnings.iter().map(|w| w.source.as_str()).collect();
        assert_eq!(sources, ["reqs.txt:1", "reqs.txt:2", "reqs.txt:4"]);
        assert_eq!(parsed.warnings[2].input, "==1.0");
    }

    #[test]
    fn hash_inside_url_fragment_is_not_a_comment() {
        assert_eq!(strip_comment("pkg#egg"), "pkg#egg");
        assert_eq!(strip_comment("pkg #egg"), "pkg ");
        assert_eq!(strip_comment("   # all comment"), "");
    }

    #[test]
    fn argument_errors_are_warnings() {
        let parsed = parse_requirement_args(&[
            "requests".to_string(),
            "  ".to_string(),
            "not a requirement!".to_string(),
        ]);
        assert_eq!(parsed.requirements.len(), 1);
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(parsed.warnings[0].source, "argument");
    }

    #[test]
    fn reads_file_from_disk() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "idna\ncertifi>=2024")?;
        let parsed = read_requirements_file(file.path())?;
        assert_eq!(parsed.requirements.len(), 2);
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_requirements_file(&dir.path().join("absent.txt")).unwrap_err();
        assert!(err.to_string().contains("failed to read requirements file"));
    }
}
