// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Placeholder substitution for notification templates.
//!
//! Templates use `{{.name}}` placeholders (inner whitespace allowed) that are
//! filled from a flat string map. Unknown variables render as the empty string.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Substitutes every placeholder in `text` with its value from `variables`.
pub fn render(text: &str, variables: &BTreeMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            variables.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Placeholder names in order of first appearance, without duplicates.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    PLACEHOLDER
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Positional parameter values for providers that render remotely.
///
/// One entry per distinct placeholder, ordered by first appearance; a
/// variable that was not supplied yields an empty string.
pub fn positional_params(text: &str, variables: &BTreeMap<String, String>) -> Vec<String> {
    placeholders(text)
        .into_iter()
        .map(|name| variables.get(&name).cloned().unwrap_or_default())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn extracts_params_in_first_appearance_order() {
        let body = "alertname:{{.name}}, startTime:{{.time}}, content{{.type}}";
        let params = positional_params(body, &vars(&[("name", "aaa"), ("time", "2019")]));
        assert_eq!(params, vec!["aaa", "2019", ""]);
    }

    #[test]
    fn repeated_placeholder_is_one_param() {
        let body = "{{.a}} {{.b}} {{ .a }}";
        assert_eq!(placeholders(body), vec!["a", "b"]);
    }

    #[test]
    fn renders_known_and_blanks_unknown() {
        let out = render(
            "[{{.level}}] {{ .name }} fired {{.missing}}!",
            &vars(&[("level", "P1"), ("name", "disk")]),
        );
        assert_eq!(out, "[P1] disk fired !");
    }

    #[test]
    fn text_without_placeholders_is_untouched() {
        assert_eq!(render("plain {text}", &BTreeMap::new()), "plain {text}");
        assert!(placeholders("plain {{ text }}").is_empty());
    }

    proptest! {
        #[test]
        fn param_count_matches_distinct_placeholders(names in proptest::collection::vec("[a-z]{1,4}", 0..8)) {
            let body: String = names.iter().map(|n| format!("<{{{{.{n}}}}}>")).collect();
            let distinct: HashSet<&String> = names.iter().collect();
            prop_assert_eq!(positional_params(&body, &BTreeMap::new()).len(), distinct.len());
        }

        #[test]
        fn rendering_removes_every_placeholder(value in "[a-zA-Z0-9 ]{0,12}") {
            let out = render("x {{.v}} y {{.w}}", &vars(&[("v", value.as_str())]));
            prop_assert!(!out.contains("{{"));
            prop_assert_eq!(out, format!("x {value} y "));
        }
    }
}
