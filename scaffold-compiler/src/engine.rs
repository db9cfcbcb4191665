//! Tera-backed template expansion and condition evaluation.
//!
//! # Expression surface
//!
//! | Use             | Input                          | Evaluated as                              |
//! |-----------------|--------------------------------|-------------------------------------------|
//! | path / content  | `src/{{ name }}.py`            | `Tera::render_str`                        |
//! | condition       | `use_docker and not legacy`    | `{% if <cond> %}1{% else %}0{% endif %}` |
//! | loop iterable   | `services`, `a, b`, `[a, b]`   | variable lookup, list literal, or split   |
//!
//! `exists(path="…")` (or the shorthand `exists("…")`) is available in every
//! expression. It answers from the resolver's virtual manifest first, then
//! from disk under the project root.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use serde_json::Value;
use tera::Tera;

use crate::context::{parse_scalar, VariableContext};
use crate::error::CompileError;
use crate::resolver::VirtualManifest;

// ---------------------------------------------------------------------------
// exists()
// ---------------------------------------------------------------------------

struct ExistsFn {
    known: BTreeSet<String>,
    root: Option<PathBuf>,
}

impl tera::Function for ExistsFn {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("exists() needs a string `path` argument"))?;
        let key = path.trim().trim_matches('/');
        let found = self.known.contains(key)
            || self
                .root
                .as_ref()
                .is_some_and(|root| !key.is_empty() && root.join(key).exists());
        Ok(Value::Bool(found))
    }
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

pub struct TemplateEngine {
    tera: Tera,
    project_root: Option<PathBuf>,
}

impl TemplateEngine {
    /// `project_root` lets `exists()` fall back to the live filesystem.
    pub fn new(project_root: Option<PathBuf>) -> Self {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        Self { tera, project_root }
    }

    /// Whether `text` contains any tera syntax worth rendering.
    pub fn is_template(text: &str) -> bool {
        text.contains("{{") || text.contains("{%")
    }

    pub fn render(
        &mut self,
        text: &str,
        ctx: &VariableContext,
        known: &VirtualManifest,
    ) -> Result<String, CompileError> {
        if !Self::is_template(text) {
            return Ok(text.to_string());
        }
        self.render_raw(text, ctx, known)
    }

    fn render_raw(
        &mut self,
        template: &str,
        ctx: &VariableContext,
        known: &VirtualManifest,
    ) -> Result<String, CompileError> {
        if template.contains("exists(") {
            self.tera.register_function(
                "exists",
                ExistsFn {
                    known: known.snapshot(),
                    root: self.project_root.clone(),
                },
            );
        }
        let tera_ctx = ctx.to_tera_context()?;
        self.tera
            .render_str(template, &tera_ctx)
            .map_err(|e| CompileError::template(&e))
    }

    /// Evaluate a condition to a bool. Any fault is an error; callers treat
    /// it as false.
    pub fn evaluate(
        &mut self,
        condition: &str,
        ctx: &VariableContext,
        known: &VirtualManifest,
    ) -> Result<bool, CompileError> {
        let condition = normalize_condition(condition);
        let template = format!("{{% if {condition} %}}1{{% else %}}0{{% endif %}}");
        let rendered = self.render_raw(&template, ctx, known)?;
        Ok(rendered.trim() == "1")
    }

    /// Items a `@for` loop walks over.
    pub fn iterate(
        &mut self,
        expr: &str,
        ctx: &VariableContext,
        known: &VirtualManifest,
    ) -> Result<Vec<Value>, CompileError> {
        let expr = expr.trim();
        let expr = expr
            .strip_prefix("{{")
            .and_then(|e| e.strip_suffix("}}"))
            .map(str::trim)
            .unwrap_or(expr);

        if let Some(value) = ctx.get(expr) {
            return Ok(match value {
                Value::Array(items) => items.clone(),
                Value::String(s) => split_list(s),
                Value::Null => Vec::new(),
                other => vec![other.clone()],
            });
        }
        if expr.starts_with('[') {
            if let Value::Array(items) = parse_scalar(expr) {
                return Ok(items);
            }
        }
        if is_plain_identifier(expr) {
            return Err(CompileError::Template(format!(
                "loop variable source '{expr}' is not defined"
            )));
        }
        if Self::is_template(expr) {
            let rendered = self.render_raw(expr, ctx, known)?;
            return Ok(split_list(&rendered));
        }
        Ok(split_list(expr))
    }
}

/// Accept `exists("x")` as shorthand for tera's named-argument call.
fn normalize_condition(condition: &str) -> String {
    condition
        .trim()
        .replace("exists(\"", "exists(path=\"")
        .replace("exists('", "exists(path='")
}

fn split_list(raw: &str) -> Vec<Value> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| Value::String(crate::lexer::unquote(item)))
        .collect()
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> VariableContext {
        let mut ctx = VariableContext::new();
        ctx.set("project", json!("demo"));
        ctx.set("use_docker", json!(true));
        ctx.set("legacy", json!(false));
        ctx.set("services", json!(["api", "worker"]));
        ctx
    }

    #[test]
    fn renders_placeholders() {
        let mut engine = TemplateEngine::new(None);
        let out = engine
            .render("src/{{ project }}/main.py", &ctx(), &VirtualManifest::default())
            .unwrap();
        assert_eq!(out, "src/demo/main.py");
    }

    #[test]
    fn plain_text_is_untouched() {
        let mut engine = TemplateEngine::new(None);
        let out = engine
            .render("<b>a & b</b>", &ctx(), &VirtualManifest::default())
            .unwrap();
        assert_eq!(out, "<b>a & b</b>");
    }

    #[test]
    fn html_is_not_escaped() {
        let mut engine = TemplateEngine::new(None);
        let mut c = ctx();
        c.set("tag", json!("<main>"));
        let out = engine
            .render("{{ tag }}", &c, &VirtualManifest::default())
            .unwrap();
        assert_eq!(out, "<main>");
    }

    #[test]
    fn conditions_evaluate_boolean_logic() {
        let mut engine = TemplateEngine::new(None);
        let known = VirtualManifest::default();
        assert!(engine.evaluate("use_docker", &ctx(), &known).unwrap());
        assert!(engine
            .evaluate("use_docker and not legacy", &ctx(), &known)
            .unwrap());
        assert!(engine.evaluate("project == \"demo\"", &ctx(), &known).unwrap());
        assert!(!engine.evaluate("legacy", &ctx(), &known).unwrap());
    }

    #[test]
    fn malformed_condition_is_an_error() {
        let mut engine = TemplateEngine::new(None);
        let err = engine
            .evaluate("project ==", &ctx(), &VirtualManifest::default())
            .unwrap_err();
        assert!(matches!(err, CompileError::Template(_)));
    }

    #[test]
    fn exists_sees_virtual_manifest() {
        let mut engine = TemplateEngine::new(None);
        let mut known = VirtualManifest::default();
        assert!(!engine
            .evaluate("exists(\"src/main.py\")", &ctx(), &known)
            .unwrap());
        known.register("src/main.py");
        assert!(engine
            .evaluate("exists(\"src/main.py\")", &ctx(), &known)
            .unwrap());
    }

    #[test]
    fn exists_falls_back_to_disk() {
        let root = tempfile::TempDir::new().expect("root");
        std::fs::write(root.path().join("setup.py"), "").unwrap();
        let mut engine = TemplateEngine::new(Some(root.path().to_path_buf()));
        assert!(engine
            .evaluate("exists(path='setup.py')", &ctx(), &VirtualManifest::default())
            .unwrap());
    }

    #[test]
    fn iterate_over_variables_and_literals() {
        let mut engine = TemplateEngine::new(None);
        let known = VirtualManifest::default();
        assert_eq!(
            engine.iterate("services", &ctx(), &known).unwrap(),
            vec![json!("api"), json!("worker")]
        );
        assert_eq!(
            engine.iterate("a, 'b', c", &ctx(), &known).unwrap(),
            vec![json!("a"), json!("b"), json!("c")]
        );
        assert_eq!(
            engine.iterate("[1, 2]", &ctx(), &known).unwrap(),
            vec![json!(1), json!(2)]
        );
        assert!(engine.iterate("missing", &ctx(), &known).is_err());
    }
}
