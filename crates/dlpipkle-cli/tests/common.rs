#![allow(dead_code)]

use std::panic;
use std::path::{Path, PathBuf};

use httptest::{matchers::*, responders::status_code, Expectation, Server};
use serde_json::{json, Value};

pub fn server_or_skip(test: &str) -> Option<Server> {
    match panic::catch_unwind(Server::run) {
        Ok(server) => Some(server),
        Err(_) => {
            eprintln!("skipping {test} (httptest server unavailable)");
            None
        }
    }
}

/// Minimal JSON API document: one wheel per `files` entry for `version`.
pub fn document(name: &str, version: &str, files: &[&str], requires: &[&str]) -> Value {
    let files: Vec<Value> = files
        .iter()
        .map(|file| {
            let packagetype = if file.ends_with(".whl") { "bdist_wheel" } else { "sdist" };
            json!({ "filename": file, "packagetype": packagetype })
        })
        .collect();
    json!({
        "info": { "name": name, "version": version, "requires_dist": requires },
        "releases": { version: files.clone() },
        "urls": files,
    })
}

/// Serve `doc` for `/pypi/<name>/json` and any `/pypi/<name>/<version>/json`.
pub fn serve(server: &Server, name: &str, doc: &Value) {
    let pattern = format!("^/pypi/{name}(/[^/]+)?/json$");
    server.expect(
        Expectation::matching(all_of![
            request::method("GET"),
            request::path(matches(&pattern)),
        ])
        .times(..)
        .respond_with(status_code(200).body(doc.to_string())),
    );
}

pub fn index_url(server: &Server) -> String {
    server.url_str("/pypi")
}

/// A stand-in for `python -m pip download` that writes a placeholder wheel
/// named after the pinned requirement, or fails for names in `failing`.
#[cfg(unix)]
pub fn fake_python(dir: &Path, failing: &[&str]) -> PathBuf {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    let failing = failing.join(" ");
    let script = format!(
        r#"#!/bin/sh
dest=""
while [ $# -gt 1 ]; do
  if [ "$1" = "--dest" ]; then dest="$2"; fi
  shift
done
name="${{1%%==*}}"
version="${{1##*==}}"
for failing in __none__ {failing}; do
  if [ "$name" = "$failing" ]; then
    echo "ERROR: No matching distribution found for $1" >&2
    exit 1
  fi
done
echo wheel > "$dest/$name-$version-py3-none-any.whl"
echo "Saved $dest/$name-$version-py3-none-any.whl"
"#
    );
    let path = dir.join("fake-python");
    fs::write(&path, script).expect("write fake python");
    let mut permissions = fs::metadata(&path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&path, permissions).expect("chmod");
    path
}
