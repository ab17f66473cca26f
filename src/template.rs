//! Template engine for response bodies.
//!
//! Uses Handlebars with a flat variable scope: `{{name}}` resolves against
//! path parameters, then query parameters, then global variables.

use crate::error::TemplateError;
use handlebars::Handlebars;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Load a template source from a file.
pub fn load_template(path: impl AsRef<Path>) -> Result<String, TemplateError> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|source| TemplateError::NotFound {
        path: path.to_path_buf(),
        source,
    })
}

/// Request-scoped template variables.
///
/// Later scopes shadow earlier ones on key collision.
#[derive(Debug, Clone, Default)]
pub struct RequestVars<'a> {
    pub query: Option<&'a HashMap<String, String>>,
    pub path: Option<&'a HashMap<String, String>>,
}

impl<'a> RequestVars<'a> {
    /// Path parameters only.
    pub fn path(params: &'a HashMap<String, String>) -> Self {
        Self {
            query: None,
            path: Some(params),
        }
    }
}

/// Template engine for rendering response bodies.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));

        // Bodies are not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a template. Missing variables render as empty strings.
    pub fn render(
        &self,
        source: &str,
        globals: &HashMap<String, String>,
        request: &RequestVars<'_>,
    ) -> Result<String, TemplateError> {
        if !source.contains("{{") {
            return Ok(source.to_string());
        }

        let mut scope: HashMap<&str, &str> = HashMap::with_capacity(globals.len());
        let layers = [Some(globals), request.query, request.path];
        for layer in layers.into_iter().flatten() {
            for (k, v) in layer {
                scope.insert(k.as_str(), v.as_str());
            }
        }

        Ok(self.handlebars.render_template(source, &scope)?)
    }

    /// Render a template, logging failures and returning an empty body
    /// instead of an error.
    pub fn execute(
        &self,
        source: &str,
        globals: &HashMap<String, String>,
        request: &RequestVars<'_>,
    ) -> String {
        match self.render(source, globals, request) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(error = %e, "Template rendering failed, serving empty body");
                String::new()
            }
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    let default = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    out.write(if value.is_empty() { default } else { value })?;
    Ok(())
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_lowercase())?;
    Ok(())
}
