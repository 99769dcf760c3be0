//! Agent prompt rendering.
//!
//! Instructions for the model come from a YAML prompt file with a `template`
//! key, or from the built-in default. Placeholders use the `{{$name}}` form
//! and are substituted from a variable map; unknown placeholders are left in
//! place so a typo shows up in the rendered prompt instead of vanishing.

use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

/// Agent name used when none is configured.
pub const DEFAULT_AGENT_NAME: &str = "Sam";

const DEFAULT_TEMPLATE: &str = "\
You are {{$agent_name}}, a friendly voice assistant for a grocery delivery service.
You are speaking with a customer on the phone. Keep every answer short and natural,
one or two sentences, and never read out lists longer than three items.

You can help customers check on their orders and schedule deliveries.
Before scheduling a delivery you must verify the customer's identity: ask for their
order number and use the caller's phone number to verify it.
When offering delivery slots, offer at most three options at a time.
If the customer asks for a person, or you cannot help, summarise the conversation and
transfer the call to a human colleague.
When the conversation is over, say goodbye and hang up the call.";

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\$([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").ok());

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Failed to read prompt file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse prompt file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("Prompt file {0} has an empty template")]
    EmptyTemplate(String),
}

#[derive(Debug, Deserialize)]
struct PromptFile {
    #[serde(default)]
    name: Option<String>,
    template: String,
}

/// A loaded prompt template.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub name: String,
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new("default", DEFAULT_TEMPLATE)
    }
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }

    /// Load a YAML prompt file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PromptError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| PromptError::Io {
            path: display.clone(),
            source,
        })?;
        Self::from_yaml(&contents, &display)
    }

    fn from_yaml(contents: &str, origin: &str) -> Result<Self, PromptError> {
        let file: PromptFile =
            serde_yaml::from_str(contents).map_err(|source| PromptError::Parse {
                path: origin.to_string(),
                source,
            })?;
        if file.template.trim().is_empty() {
            return Err(PromptError::EmptyTemplate(origin.to_string()));
        }
        Ok(Self::new(
            file.name.unwrap_or_else(|| origin.to_string()),
            file.template,
        ))
    }

    /// Substitute `{{$var}}` placeholders.
    pub fn render(&self, variables: &HashMap<&str, &str>) -> String {
        let Some(placeholder) = PLACEHOLDER.as_ref() else {
            return self.template.clone();
        };
        placeholder
            .replace_all(&self.template, |caps: &Captures| {
                let name = &caps[1];
                match variables.get(name) {
                    Some(value) => (*value).to_string(),
                    None => {
                        tracing::warn!(prompt = %self.name, "Unresolved prompt variable: {}", name);
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    /// Render the agent instructions.
    pub fn render_agent(&self, agent_name: &str) -> String {
        let variables = HashMap::from([("agent_name", agent_name)]);
        self.render(&variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_prompt_renders_agent_name() {
        let rendered = PromptTemplate::default().render_agent(DEFAULT_AGENT_NAME);
        assert!(rendered.starts_with("You are Sam,"));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn test_render_variants() {
        let template = PromptTemplate::new("t", "Hi {{$agent_name}} and {{ $agent_name }}, {{$other}}");
        let rendered = template.render_agent("Ava");
        assert_eq!(rendered, "Hi Ava and Ava, {{$other}}");
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "name: support\ntemplate: |\n  You are {{{{$agent_name}}}}.").unwrap();

        let template = PromptTemplate::from_file(file.path()).unwrap();
        assert_eq!(template.name, "support");
        assert_eq!(template.render_agent("Max").trim(), "You are Max.");
    }

    #[test]
    fn test_from_file_errors() {
        assert!(matches!(
            PromptTemplate::from_file("/nonexistent/prompt.yaml"),
            Err(PromptError::Io { .. })
        ));
        assert!(matches!(
            PromptTemplate::from_yaml("name: x\n", "inline"),
            Err(PromptError::Parse { .. })
        ));
        assert!(matches!(
            PromptTemplate::from_yaml("template: \"  \"\n", "inline"),
            Err(PromptError::EmptyTemplate(_))
        ));
    }
}
