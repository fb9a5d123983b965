//! System variables: outputs of auto-run tools, usable as `{name}`
//! placeholders in prompts and tool bindings.
//!
//! The map is computed once by a pre-execution pass at session start and
//! replaced atomically on an explicit refresh. Partial updates are not
//! exposed.

use crate::tools::ToolRegistry;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

/// Name → last-computed value mapping from the pre-execution pass.
#[derive(Debug, Clone, Default)]
pub struct SystemVariables {
    values: HashMap<String, Value>,
}

impl SystemVariables {
    /// Create an empty variable map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a variable by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Number of stored variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn insert(&mut self, name: String, value: Value) {
        self.values.insert(name, value);
    }
}

/// Render a JSON value for placeholder insertion: strings verbatim, anything
/// else as compact JSON.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `{name}` tokens in `template`.
///
/// Arguments take precedence over system variables on name collision.
/// Unresolved placeholders are left literal.
pub fn substitute(
    template: &str,
    args: &serde_json::Map<String, Value>,
    vars: &SystemVariables,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                let is_ident = !name.is_empty()
                    && name.chars().all(|c| c.is_alphanumeric() || c == '_');
                let resolved = if is_ident {
                    args.get(name).or_else(|| vars.get(name))
                } else {
                    None
                };
                match resolved {
                    Some(value) => out.push_str(&value_to_string(value)),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Run the pre-execution pass: invoke each named tool once, in order, and
/// collect outputs into a fresh variable map.
///
/// Variables computed earlier in the pass are visible to later tools'
/// placeholder substitution. A failing tool logs a warning and contributes
/// nothing; the pass never aborts.
pub async fn run_startup_pass(registry: &ToolRegistry, names: &[String]) -> SystemVariables {
    let mut vars = SystemVariables::new();
    for name in names {
        let args = serde_json::Map::new();
        match registry.invoke(name, &args, &vars).await {
            Ok(value) => {
                info!("system tool '{name}' computed");
                vars.insert(name.clone(), value);
            }
            Err(e) => {
                warn!("system tool '{name}' failed: {e}");
            }
        }
    }
    info!("pre-execution pass stored {} variable(s)", vars.len());
    vars
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use serde_json::json;

    fn vars_with(pairs: &[(&str, Value)]) -> SystemVariables {
        let mut vars = SystemVariables::new();
        for (name, value) in pairs {
            vars.insert((*name).to_owned(), value.clone());
        }
        vars
    }

    #[test]
    fn substitutes_system_variable() {
        let vars = vars_with(&[("cidade", json!("São Paulo"))]);
        let out = substitute("clima em {cidade}", &serde_json::Map::new(), &vars);
        assert_eq!(out, "clima em São Paulo");
    }

    #[test]
    fn argument_shadows_system_variable() {
        let vars = vars_with(&[("cidade", json!("São Paulo"))]);
        let mut args = serde_json::Map::new();
        args.insert("cidade".to_owned(), json!("Rio"));
        let out = substitute("clima em {cidade}", &args, &vars);
        assert_eq!(out, "clima em Rio");
    }

    #[test]
    fn unresolved_placeholder_left_literal() {
        let vars = SystemVariables::new();
        let out = substitute("olá {quem}", &serde_json::Map::new(), &vars);
        assert_eq!(out, "olá {quem}");
    }

    #[test]
    fn non_identifier_braces_left_literal() {
        let vars = vars_with(&[("a", json!("x"))]);
        let out = substitute("json: {\"k\": 1} e {a}", &serde_json::Map::new(), &vars);
        assert_eq!(out, "json: {\"k\": 1} e x");
    }

    #[test]
    fn unclosed_brace_left_literal() {
        let vars = SystemVariables::new();
        let out = substitute("abre {sem fim", &serde_json::Map::new(), &vars);
        assert_eq!(out, "abre {sem fim");
    }

    #[test]
    fn non_string_value_rendered_as_json() {
        let vars = vars_with(&[("total", json!(42)), ("lista", json!([1, 2]))]);
        let out = substitute("{total} itens: {lista}", &serde_json::Map::new(), &vars);
        assert_eq!(out, "42 itens: [1,2]");
    }

    #[test]
    fn multiple_occurrences_all_replaced() {
        let vars = vars_with(&[("x", json!("a"))]);
        let out = substitute("{x}{x} {x}", &serde_json::Map::new(), &vars);
        assert_eq!(out, "aa a");
    }
}
