//! Campaign personalization: single-pass `{{placeholder}}` substitution.
//!
//! Unlike the notification templates (which go through minijinja), campaign
//! content comes from tenants and may contain placeholders we do not know.
//! Those must survive verbatim, so substitution is one regex pass per
//! string with unknown names left intact. Substituting an already
//! substituted string is a no-op as long as the values themselves do not
//! look like placeholders.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid");
}

pub fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Flatten a recipient into substitution variables: `name`, `email`, and
/// every metadata key. Non-string metadata values render as their JSON
/// form.
pub fn recipient_vars(
    name: Option<&str>,
    email: &str,
    metadata: Option<&serde_json::Map<String, serde_json::Value>>,
) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("name".to_string(), name.unwrap_or("").to_string());
    vars.insert("email".to_string(), email.to_string());
    if let Some(metadata) = metadata {
        for (key, value) in metadata {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            vars.insert(key.clone(), rendered);
        }
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_name_and_email() {
        let vars = vars(&[("name", "Ada"), ("email", "ada@x.com")]);
        assert_eq!(substitute("Hi {{name}}", &vars), "Hi Ada");
        assert_eq!(
            substitute("<p>{{name}}/{{email}}</p>", &vars),
            "<p>Ada/ada@x.com</p>"
        );
    }

    #[test]
    fn unknown_placeholders_are_left_intact() {
        let vars = vars(&[("name", "Ada")]);
        assert_eq!(
            substitute("{{name}} has {{points}} points", &vars),
            "Ada has {{points}} points"
        );
    }

    #[test]
    fn substitution_is_idempotent_on_substituted_output() {
        let vars = vars(&[("name", "Ada"), ("email", "ada@x.com")]);
        let once = substitute("Hi {{name}} ({{email}}), {{unknown}}", &vars);
        let twice = substitute(&once, &vars);
        assert_eq!(once, twice);
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        let vars = vars(&[("name", "Ada")]);
        assert_eq!(substitute("Hi {{ name }}", &vars), "Hi Ada");
    }

    #[test]
    fn metadata_keys_become_vars() {
        let metadata = serde_json::json!({"plan": "pro", "seats": 5});
        let vars = recipient_vars(
            Some("Ada"),
            "ada@x.com",
            metadata.as_object(),
        );
        assert_eq!(
            substitute("{{plan}} with {{seats}} seats", &vars),
            "pro with 5 seats"
        );
    }

    #[test]
    fn missing_name_renders_empty() {
        let vars = recipient_vars(None, "a@x.com", None);
        assert_eq!(substitute("Hi {{name}}!", &vars), "Hi !");
    }
}
