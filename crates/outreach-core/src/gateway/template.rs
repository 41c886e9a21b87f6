//! Placeholder template renderer
//!
//! Templates are plain text with `{{name}}` placeholders. Rendering fails
//! when a placeholder has no value so that no half-filled message is sent.

use super::TemplateRenderer;
use async_trait::async_trait;
use outreach_common::{Error, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Renderer over template bodies registered in memory
#[derive(Default)]
pub struct PlaceholderRenderer {
    templates: RwLock<HashMap<String, String>>,
}

impl PlaceholderRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a template body
    pub async fn register(&self, template_id: impl Into<String>, body: impl Into<String>) {
        self.templates
            .write()
            .await
            .insert(template_id.into(), body.into());
    }

    async fn body(&self, template_id: &str) -> Result<String> {
        self.templates
            .read()
            .await
            .get(template_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Template {} not found", template_id)))
    }
}

/// Placeholder names of a body, in order of first appearance
pub fn placeholders(body: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in placeholder_pattern().captures_iter(body) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Substitute every placeholder of `body` from `values`
pub fn fill(body: &str, values: &HashMap<String, String>) -> Result<String> {
    if let Some(missing) = placeholders(body)
        .into_iter()
        .find(|name| !values.contains_key(name))
    {
        return Err(Error::Validation(format!(
            "No value for template variable {}",
            missing
        )));
    }

    Ok(placeholder_pattern()
        .replace_all(body, |caps: &regex::Captures<'_>| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

#[async_trait]
impl TemplateRenderer for PlaceholderRenderer {
    async fn render(&self, template_id: &str, values: &HashMap<String, String>) -> Result<String> {
        let body = self.body(template_id).await?;
        fill(&body, values)
    }

    async fn variable_names(&self, template_id: &str) -> Result<Vec<String>> {
        let body = self.body(template_id).await?;
        Ok(placeholders(&body))
    }
}
