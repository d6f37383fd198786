/// Canonical form of a distribution name: lowercase, with every run of `.`,
/// `_` and `-` collapsed into a single `-`.
#[must_use]
pub fn normalize(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '.' | '_' | '-') {
            if !in_separator {
                normalized.push('-');
                in_separator = true;
            }
            continue;
        }
        in_separator = false;
        normalized.extend(ch.to_lowercase());
    }
    normalized
}
