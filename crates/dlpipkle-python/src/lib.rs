use anyhow::{anyhow, bail, Result};

/// Interpreter used to run `pip download`.
///
/// An explicit override wins; otherwise the first of `python3`/`python` on
/// `PATH`.
///
/// # Errors
/// Returns an error when no interpreter can be located.
pub fn detect_interpreter(explicit: Option<&str>) -> Result<String> {
    if let Some(explicit) = explicit.map(str::trim).filter(|value| !value.is_empty()) {
        return Ok(explicit.to_string());
    }

    for candidate in ["python3", "python"] {
        if let Ok(path) = which::which(candidate) {
            return path
                .into_os_string()
                .into_string()
                .map_err(|_| anyhow!("non-utf8 path for {candidate}"));
        }
    }

    bail!("no python interpreter found; set DLPIPKLE_PYTHON");
}

/// Arguments that turn an interpreter invocation into a pip invocation.
#[must_use]
pub fn pip_prefix() -> Vec<String> {
    vec!["-m".to_string(), "pip".to_string()]
}
