//! Template resolver: `{{name}}` substitution against a variable scope.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, thiserror::Error)]
#[error("unresolved template variables: {0:?}")]
pub struct TemplateResolutionError(pub Vec<String>);

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").unwrap())
}

/// Braces must balance: every `{{` has a matching `}}` and vice versa.
pub fn braces_balanced(template: &str) -> bool {
    let opens = template.matches("{{").count();
    let closes = template.matches("}}").count();
    opens == closes
}

/// Resolves every `{{name}}` placeholder in `template` against `scope`.
/// Fails listing every name that could not be resolved; never leaves a
/// placeholder unreplaced on success.
pub fn resolve(template: &str, scope: &serde_json::Map<String, Value>) -> Result<String, TemplateResolutionError> {
    let mut unresolved = Vec::new();
    let mut had_unresolved = false;
    let result = placeholder_re().replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        match scope.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                had_unresolved = true;
                unresolved.push(name.to_string());
                String::new()
            }
        }
    });
    if had_unresolved {
        return Err(TemplateResolutionError(unresolved));
    }
    Ok(result.into_owned())
}

/// Resolves only the special variables (`_batch_id`, `_batch_start_time`),
/// as used for init-step params which have no member scope.
pub fn resolve_init_params(
    template: &str,
    batch_id: uuid::Uuid,
    batch_start_time: chrono::DateTime<chrono::Utc>,
) -> Result<String, TemplateResolutionError> {
    let mut scope = serde_json::Map::new();
    scope.insert("_batch_id".into(), Value::String(batch_id.to_string()));
    scope.insert(
        "_batch_start_time".into(),
        Value::String(batch_start_time.to_rfc3339()),
    );
    resolve(template, &scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn resolves_known_variables() {
        let mut scope = serde_json::Map::new();
        scope.insert("uid".into(), Value::String("u1".into()));
        let out = resolve("hello {{uid}}", &scope).unwrap();
        assert_eq!(out, "hello u1");
    }

    #[test]
    fn reports_every_unresolved_name() {
        let scope = serde_json::Map::new();
        let err = resolve("{{a}} and {{b}}", &scope).unwrap_err();
        assert_eq!(err.0, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn braces_balance_check() {
        assert!(braces_balanced("{{a}} {{b}}"));
        assert!(!braces_balanced("{{a} {{b}}"));
    }

    /// R2: resolving an already-fully-resolved string is a no-op.
    #[test]
    fn resolve_is_idempotent_once_fully_resolved() {
        let mut scope = serde_json::Map::new();
        scope.insert("uid".into(), Value::String("u1".into()));
        let once = resolve("hello {{uid}}", &scope).unwrap();
        let twice = resolve(&once, &scope).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn init_params_only_bind_special_variables() {
        let batch_id = uuid::Uuid::nil();
        let now = Utc::now();
        let out = resolve_init_params("batch {{_batch_id}}", batch_id, now).unwrap();
        assert_eq!(out, format!("batch {batch_id}"));

        let err = resolve_init_params("{{uid}}", batch_id, now).unwrap_err();
        assert_eq!(err.0, vec!["uid".to_string()]);
    }
}
