const PROXY_KEYS: &[&str] = &[
    "HTTP_PROXY",
    "http_proxy",
    "HTTPS_PROXY",
    "https_proxy",
    "ALL_PROXY",
    "all_proxy",
    "NO_PROXY",
    "no_proxy",
];

/// Decide whether the metadata client should honor proxy environment variables.
///
/// - `DLPIPKLE_KEEP_PROXIES=1/true/yes/on` forces proxies on.
/// - `DLPIPKLE_KEEP_PROXIES=0/false/no/off/""` forces proxies off.
/// - Unset: proxies are enabled only when at least one proxy variable is set.
pub(crate) fn keep_proxies(lookup: impl Fn(&str) -> Option<String>) -> bool {
    match lookup("DLPIPKLE_KEEP_PROXIES") {
        Some(raw) => {
            let value = raw.trim().to_ascii_lowercase();
            !matches!(value.as_str(), "" | "0" | "false" | "no" | "off")
        }
        None => PROXY_KEYS
            .iter()
            .any(|key| lookup(key).is_some_and(|value| !value.trim().is_empty())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_to_enabled_when_proxy_env_is_set() {
        assert!(keep_proxies(lookup(&[("HTTPS_PROXY", "http://proxy.example")])));
    }

    #[test]
    fn defaults_to_disabled_without_proxy_env() {
        assert!(!keep_proxies(lookup(&[])));
        assert!(!keep_proxies(lookup(&[("http_proxy", "  ")])));
    }

    #[test]
    fn override_forces_enabled() {
        assert!(keep_proxies(lookup(&[("DLPIPKLE_KEEP_PROXIES", "1")])));
        assert!(keep_proxies(lookup(&[("DLPIPKLE_KEEP_PROXIES", "Yes")])));
    }

    #[test]
    fn override_forces_disabled() {
        assert!(!keep_proxies(lookup(&[
            ("DLPIPKLE_KEEP_PROXIES", "0"),
            ("HTTP_PROXY", "http://proxy.example"),
        ])));
        assert!(!keep_proxies(lookup(&[("DLPIPKLE_KEEP_PROXIES", "")])));
    }
}
