#[cfg(test)]
mod tests;

pub mod templates;

use fancy_regex::Regex;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::{RagError, Result};

/// Implicit variable slot the orchestrator binds retrieved context to.
pub const CONTEXT_VARIABLE: &str = "context";

/// Rendered in place of context when retrieval was disabled or returned
/// nothing, so the model can reason about the absence of grounding instead
/// of seeing a silent blank.
pub const EMPTY_CONTEXT_MARKER: &str = "[no retrieved context]";

/// Matches `{name}` placeholders while skipping `{{`/`}}` brace escapes.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?<!\{)\{([A-Za-z_][A-Za-z0-9_]*)\}(?!\})")
        .expect("placeholder pattern is valid")
});

/// A named, versioned text-generation recipe.
///
/// `variables` must exactly match the set of placeholders textually present
/// in `system_message` plus `template`; [`PromptRegistry::register`] enforces
/// the check in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub system_message: Option<String>,
    /// Body with `{variable}` placeholders. `{{` and `}}` escape literal
    /// braces.
    pub template: String,
    pub variables: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl PromptTemplate {
    /// Whether this template declares the given variable.
    #[inline]
    pub fn declares(&self, variable: &str) -> bool {
        self.variables.iter().any(|v| v == variable)
    }

    /// Distinct placeholder names present in the system message and body.
    fn placeholders(&self) -> Result<BTreeSet<String>> {
        let mut found = BTreeSet::new();
        let sources = [self.system_message.as_deref(), Some(self.template.as_str())];
        for source in sources.into_iter().flatten() {
            for capture in PLACEHOLDER_RE.captures_iter(source) {
                let capture = capture.map_err(|e| {
                    RagError::Validation(format!(
                        "template '{}' failed placeholder scan: {e}",
                        self.name
                    ))
                })?;
                if let Some(name) = capture.get(1) {
                    found.insert(name.as_str().to_string());
                }
            }
        }
        Ok(found)
    }
}

/// A rendered instruction/content payload ready for the model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: Option<String>,
    pub user: String,
}

/// Explicit template registry, constructed once at startup and shared by
/// reference; there is no module-level mutable state.
#[derive(Debug, Clone, Default)]
pub struct PromptRegistry {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in template library.
    #[inline]
    pub fn with_builtin_templates() -> Result<Self> {
        let mut registry = Self::new();
        for template in templates::builtin() {
            registry.register(template)?;
        }
        debug!("Loaded {} built-in templates", registry.templates.len());
        Ok(registry)
    }

    /// Register a template, enforcing the symmetric declared-variables ↔
    /// placeholders check. Both under- and over-declaration fail, naming
    /// every offending variable.
    #[inline]
    pub fn register(&mut self, template: PromptTemplate) -> Result<()> {
        if template.name.trim().is_empty() {
            return Err(RagError::Validation(
                "template name cannot be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&template.temperature) {
            return Err(RagError::Validation(format!(
                "template '{}' temperature {} is outside 0.0..=1.0",
                template.name, template.temperature
            )));
        }
        if !(100..=4000).contains(&template.max_tokens) {
            return Err(RagError::Validation(format!(
                "template '{}' max_tokens {} is outside 100..=4000",
                template.name, template.max_tokens
            )));
        }

        let placeholders = template.placeholders()?;
        let declared: BTreeSet<String> = template.variables.iter().cloned().collect();
        let undeclared: Vec<String> = placeholders.difference(&declared).cloned().collect();
        let unused: Vec<String> = declared.difference(&placeholders).cloned().collect();
        if !undeclared.is_empty() || !unused.is_empty() {
            return Err(RagError::TemplateDeclaration {
                template: template.name,
                undeclared,
                unused,
            });
        }

        if self
            .templates
            .insert(template.name.clone(), template)
            .is_some()
        {
            warn!("Overwrote an existing template during registration");
        }
        Ok(())
    }

    #[inline]
    pub fn get(&self, name: &str) -> Result<&PromptTemplate> {
        self.templates
            .get(name)
            .ok_or_else(|| RagError::UnknownTemplate(name.to_string()))
    }

    #[inline]
    pub fn remove(&mut self, name: &str) -> Option<PromptTemplate> {
        self.templates.remove(name)
    }

    /// Registered template names, sorted.
    #[inline]
    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).sorted().collect()
    }

    /// Render a template with the supplied variables.
    ///
    /// Fails closed listing every missing variable; extra unused keys are
    /// ignored. There is no silent empty-string substitution.
    #[inline]
    pub fn render(
        &self,
        name: &str,
        variables: &HashMap<String, String>,
    ) -> Result<RenderedPrompt> {
        let template = self.get(name)?;

        let mut missing: Vec<String> = template
            .variables
            .iter()
            .filter(|v| !variables.contains_key(*v))
            .cloned()
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            return Err(RagError::MissingVariables {
                template: name.to_string(),
                missing,
            });
        }

        let system = match template.system_message.as_deref() {
            Some(text) => Some(substitute(text, variables)?),
            None => None,
        };
        let user = substitute(&template.template, variables)?;

        Ok(RenderedPrompt { system, user })
    }
}

/// Replace every genuine `{name}` placeholder with its bound value, then
/// collapse `{{`/`}}` escapes to literal braces.
fn substitute(text: &str, variables: &HashMap<String, String>) -> Result<String> {
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;

    for capture in PLACEHOLDER_RE.captures_iter(text) {
        let capture =
            capture.map_err(|e| RagError::Validation(format!("placeholder scan failed: {e}")))?;
        let Some(whole) = capture.get(0) else {
            continue;
        };
        let Some(name) = capture.get(1) else {
            continue;
        };

        output.push_str(text.get(cursor..whole.start()).unwrap_or_default());
        match variables.get(name.as_str()) {
            Some(value) => output.push_str(value),
            // Unreachable after the missing-variable check; keep the
            // placeholder verbatim rather than dropping it.
            None => output.push_str(whole.as_str()),
        }
        cursor = whole.end();
    }

    output.push_str(text.get(cursor..).unwrap_or_default());
    Ok(output.replace("{{", "{").replace("}}", "}"))
}
