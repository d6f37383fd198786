use std::path::Path;

use atty::Stream;
use color_eyre::Result;
use dlpipkle_core::{CommandStatus, ExecutionOutcome};
use serde_json::Value;

use crate::cli::{DlpipkleCli, Mode};
use crate::style::Style;

pub fn emit_output(cli: &DlpipkleCli, mode: Mode, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(code);
    }
    if cli.quiet {
        if outcome.status != CommandStatus::Ok {
            eprintln!("{}", outcome.message);
        }
        return Ok(code);
    }

    let style = Style::new(cli.no_color, atty::is(Stream::Stdout));
    let body = match mode {
        Mode::Download => render_downloads(&style, &outcome.details),
        Mode::ListPlatforms => render_platforms(&style, &outcome.details),
        Mode::DependencyTree => outcome
            .details
            .get("tree")
            .and_then(Value::as_str)
            .filter(|tree| !tree.is_empty())
            .map(ToOwned::to_owned),
    };
    if let Some(body) = body {
        println!("{body}");
    }
    println!("{}", style.status(outcome.status, &outcome.message));
    if let Some(hint) = outcome.details.get("hint").and_then(Value::as_str) {
        println!("{}", style.info(&format!("Hint: {hint}")));
    }
    Ok(code)
}

fn render_downloads(style: &Style, details: &Value) -> Option<String> {
    let downloads = details.get("downloads")?.as_array()?;
    if downloads.is_empty() {
        return None;
    }
    let versions: Vec<(&str, &str)> = details
        .get("packages")
        .and_then(Value::as_array)
        .map(|packages| {
            packages
                .iter()
                .filter_map(|pkg| Some((pkg.get("name")?.as_str()?, pkg.get("version")?.as_str()?)))
                .collect()
        })
        .unwrap_or_default();

    let mut rows = Vec::new();
    let mut failed = Vec::new();
    for download in downloads {
        let name = download.get("name")?.as_str()?;
        let version = versions
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map_or("", |(_, version)| *version);
        let succeeded = download.get("succeeded")?.as_bool()?;
        let fallback = download.get("attempt").and_then(Value::as_str) == Some("fallback");
        let result = match (succeeded, fallback) {
            (true, false) => "ok".to_string(),
            (true, true) => "ok (any platform)".to_string(),
            (false, _) => style.failed("failed"),
        };
        let detail = if succeeded {
            download
                .get("artifacts")
                .and_then(Value::as_array)
                .map(|artifacts| {
                    artifacts
                        .iter()
                        .filter_map(Value::as_str)
                        .filter_map(|path| Path::new(path).file_name()?.to_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default()
        } else {
            failed.push(name);
            download
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        rows.push([name.to_string(), version.to_string(), result, detail]);
    }

    let mut text = format_table(style, ["Package", "Version", "Result", "Detail"], &rows);
    if !failed.is_empty() {
        text.push_str(&format!("\nFailed: {}", failed.join(", ")));
    }
    Some(text)
}

fn render_platforms(style: &Style, details: &Value) -> Option<String> {
    let current = details.get("current").and_then(Value::as_str).unwrap_or_default();
    let packages = details.get("packages")?.as_array()?;
    let mut lines = Vec::new();
    for package in packages {
        let name = package.get("name")?.as_str()?;
        let title = match package.get("version").and_then(Value::as_str) {
            Some(version) => format!("Available platforms for {name} {version}:"),
            None => format!("Available platforms for {name}:"),
        };
        lines.push(style.heading(&title));
        if let Some(error) = package.get("error").and_then(Value::as_str) {
            lines.push(style.failed(&format!("  error: {error}")));
            continue;
        }
        let groups = package.get("groups").and_then(Value::as_array);
        let Some(groups) = groups.filter(|groups| !groups.is_empty()) else {
            lines.push("  no distributions published".to_string());
            continue;
        };
        for group in groups {
            let family = group.get("family")?.as_str()?;
            lines.push(format!("  {family}:"));
            for tag in group.get("platforms")?.as_array()? {
                let tag = tag.as_str()?;
                if tag == current {
                    lines.push(format!("    - {}", style.current(&format!("{tag} (current)"))));
                } else {
                    lines.push(format!("    - {tag}"));
                }
            }
        }
        if let Some(verdict) = compatibility_verdict(style, package, current) {
            lines.push(verdict);
        }
    }
    if !current.is_empty() {
        lines.push(style.info(&format!("Current platform: {current}")));
    }
    Some(lines.join("\n"))
}

fn compatibility_verdict(style: &Style, package: &Value, current: &str) -> Option<String> {
    let verdict = match package.get("compatibility")?.as_str()? {
        "current" => format!("  Compatible with the current platform ({current})."),
        "any" => "  Compatible with any platform.".to_string(),
        "source" => {
            "  Source distribution available; it can be built for the current platform.".to_string()
        }
        _ => {
            return Some(style.failed(&format!(
                "  Warning: nothing published for the current platform ({current}); \
                 build from source or pick another version."
            )))
        }
    };
    Some(style.info(&verdict))
}

// Columns are padded on visible width so colored cells stay aligned.
fn format_table<const N: usize>(style: &Style, headers: [&str; N], rows: &[[String; N]]) -> String {
    let mut widths = headers.map(str::len);
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(visible_len(cell));
        }
    }

    let pad = |cells: &[&str]| -> String {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| {
                let fill = width.saturating_sub(visible_len(cell));
                format!("{cell}{}", " ".repeat(fill))
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(style.heading(&pad(&headers)));
    lines.push(
        widths
            .iter()
            .map(|width| "-".repeat(*width))
            .collect::<Vec<_>>()
            .join("  "),
    );
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        lines.push(pad(&cells));
    }
    lines.join("\n")
}

// Character count with ANSI escape sequences skipped.
fn visible_len(text: &str) -> usize {
    let mut len = 0;
    let mut in_escape = false;
    for ch in text.chars() {
        if in_escape {
            if ch.is_ascii_alphabetic() {
                in_escape = false;
            }
        } else if ch == '\u{1b}' {
            in_escape = true;
        } else {
            len += 1;
        }
    }
    len
}
