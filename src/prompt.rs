//! Query parsing and prompt templates.
//!
//! The free-text query may start with one of two reserved words:
//!
//! - `c ...` continues the previous conversation.
//! - `p <template> [args...]` expands a named template, binding its `{var}`
//!   placeholders to the arguments in order.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(\w+)\}").expect("hardcoded placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("prompt template '{name}' not found; available templates: {}", available.join(", "))]
    UnknownTemplate { name: String, available: Vec<String> },

    #[error("missing argument '{argument}' for prompt template '{template}'")]
    MissingArgument { template: String, argument: String },
}

/// Named prompt templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    templates: BTreeMap<String, String>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptTemplates {
    /// The templates shipped with the CLI.
    pub fn builtin() -> Self {
        let templates = [
            ("review", "Review {file}"),
            (
                "commit",
                "Write a concise git commit message for the following changes:\n{changes}",
            ),
            ("yt", "Summarize the YouTube video at {url}"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { templates }
    }

    /// Add or replace templates, e.g. from the config file.
    #[must_use]
    pub fn with_overrides<I>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.templates.extend(extra);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    pub fn names(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.templates.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Distinct placeholder names of `template`, in order of first use.
    pub fn variables(template: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for cap in PLACEHOLDER.captures_iter(template) {
            let name = cap[1].to_string();
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }

    /// Expand `name` with positional `args`. Extra arguments are ignored.
    pub fn render(&self, name: &str, args: &[&str]) -> Result<String, QueryError> {
        let template = self.get(name).ok_or_else(|| QueryError::UnknownTemplate {
            name: name.to_string(),
            available: self.names(),
        })?;

        let vars = Self::variables(template);
        let bound: BTreeMap<&str, &str> = vars
            .iter()
            .map(String::as_str)
            .zip(args.iter().copied())
            .collect();
        if let Some(missing) = vars.iter().find(|v| !bound.contains_key(v.as_str())) {
            return Err(QueryError::MissingArgument {
                template: name.to_string(),
                argument: missing.clone(),
            });
        }

        Ok(PLACEHOLDER
            .replace_all(template, |cap: &regex::Captures<'_>| {
                bound.get(&cap[1]).copied().unwrap_or_default().to_string()
            })
            .into_owned())
    }
}

/// A query ready for the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub text: String,
    pub continue_previous: bool,
}

/// Interpret the positional query words.
///
/// `read_stdin` is only called when there are no words; it should return the
/// piped input, or `None` when stdin is a terminal.
pub fn parse_query<F>(
    words: &[String],
    templates: &PromptTemplates,
    read_stdin: F,
) -> Result<ParsedQuery, QueryError>
where
    F: FnOnce() -> Option<String>,
{
    let joined = words.join(" ");
    let parts: Vec<&str> = joined.split_whitespace().collect();

    match parts.as_slice() {
        [] => Ok(ParsedQuery {
            text: read_stdin().map(|s| s.trim().to_string()).unwrap_or_default(),
            continue_previous: false,
        }),
        ["c", rest @ ..] => Ok(ParsedQuery {
            text: rest.join(" "),
            continue_previous: true,
        }),
        ["p", name, args @ ..] => Ok(ParsedQuery {
            text: templates.render(name, args)?,
            continue_previous: false,
        }),
        _ => Ok(ParsedQuery {
            text: parts.join(" "),
            continue_previous: false,
        }),
    }
}
