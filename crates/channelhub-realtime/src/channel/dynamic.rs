//! Dynamic channel templates.
//!
//! A template such as `rooms/:id` or `me/:Owner/:doc` matches runtime ids of
//! the same shape; each distinct matching id gets its own channel instance.
//! The reserved `:Owner` placeholder only matches when the extracted segment
//! equals the requester's identity.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{HubError, HubResult};

use super::channel::Channel;

/// Placeholder syntax inside a template id.
static PARAM_DEFINITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":[a-zA-Z0-9]+").expect("Invalid placeholder regex"));

/// Characters a placeholder may bind to.
const PARAM_VALUE_PATTERN: &str = r"([a-zA-Z0-9_\-]+)";

/// Name of the placeholder bound to the requester's identity.
pub const OWNER_PARAM: &str = "Owner";

/// Outcome of matching a runtime id against a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateMatch {
    /// The id has the template's shape and the owner (if any) matches.
    Matched,
    /// The id has the shape of an owner template but belongs to someone else.
    OwnerMismatch,
    /// The id does not have the template's shape.
    NoMatch,
}

/// Whether an id contains at least one `:name` placeholder.
pub fn has_named_parameter(id: &str) -> bool {
    PARAM_DEFINITION.is_match(id)
}

/// A compiled template bound to its prototype channel.
#[derive(Debug)]
pub struct DynamicTemplate {
    pattern: Regex,
    param_names: Vec<String>,
    owner_template: bool,
    prototype: Arc<Channel>,
}

impl DynamicTemplate {
    /// Compiles the prototype's id into a matcher.
    pub fn compile(prototype: Arc<Channel>) -> HubResult<Self> {
        let template = prototype.id();
        if template.is_empty() {
            return Err(HubError::InvalidChannel(
                "a template id like 'rooms/:id' must be provided".to_string(),
            ));
        }

        let mut pattern = String::from("^");
        let mut param_names = Vec::new();
        let mut last = 0;
        for found in PARAM_DEFINITION.find_iter(template) {
            pattern.push_str(&regex::escape(&template[last..found.start()]));
            pattern.push_str(PARAM_VALUE_PATTERN);
            param_names.push(found.as_str()[1..].to_string());
            last = found.end();
        }
        pattern.push_str(&regex::escape(&template[last..]));
        pattern.push('$');

        let compiled = Regex::new(&pattern).map_err(|source| HubError::InvalidTemplate {
            template: template.to_string(),
            source,
        })?;
        let owner_template = param_names.iter().any(|name| name == OWNER_PARAM);

        Ok(Self {
            pattern: compiled,
            param_names,
            owner_template,
            prototype,
        })
    }

    /// The template id as declared.
    pub fn template(&self) -> &str {
        self.prototype.id()
    }

    /// Whether the template binds `:Owner`.
    pub fn is_owner_template(&self) -> bool {
        self.owner_template
    }

    /// Extracts named parameters from a matching id.
    pub fn params(&self, id: &str) -> Option<HashMap<String, String>> {
        let captures = self.pattern.captures(id)?;
        Some(
            self.param_names
                .iter()
                .zip(captures.iter().skip(1))
                .filter_map(|(name, value)| value.map(|v| (name.clone(), v.as_str().to_string())))
                .collect(),
        )
    }

    /// Matches a runtime id on behalf of a requester.
    pub fn matches(&self, id: &str, requester: &str) -> TemplateMatch {
        let Some(params) = self.params(id) else {
            return TemplateMatch::NoMatch;
        };
        if self.owner_template
            && params.get(OWNER_PARAM).map(String::as_str) != Some(requester)
        {
            return TemplateMatch::OwnerMismatch;
        }
        TemplateMatch::Matched
    }

    /// Creates the channel instance for a matching id.
    pub fn instantiate(self: &Arc<Self>, id: &str) -> Arc<Channel> {
        let params = self.params(id).unwrap_or_default();
        Arc::new(self.prototype.instantiate(id, Arc::clone(self), params))
    }
}
