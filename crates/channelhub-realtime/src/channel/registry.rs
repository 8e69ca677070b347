//! Channel registry owned by the hub control loop.
//!
//! The registry is not shared: it is moved into the control loop at `run`
//! and every mutation happens there, so it carries no locks of its own.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::HubResult;

use super::channel::Channel;
use super::dynamic::{DynamicTemplate, TemplateMatch, has_named_parameter};

/// Outcome of looking up a runtime id among the dynamic templates.
#[derive(Debug)]
pub(crate) enum TemplateLookup {
    /// A template matched; the instantiated channel is returned.
    Matched(Arc<Channel>),
    /// The id has the shape of another user's owner channel.
    Rejected,
    /// No template has this shape.
    Miss,
}

/// Static channels by id, system channels and dynamic templates.
#[derive(Debug, Default)]
pub(crate) struct ChannelRegistry {
    channels: HashMap<String, Arc<Channel>>,
    system: Vec<Arc<Channel>>,
    templates: HashMap<String, Arc<DynamicTemplate>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a channel: templated ids become dynamic templates, the rest
    /// are validated and attached.
    pub fn declare(&mut self, channel: Arc<Channel>) -> HubResult<()> {
        if has_named_parameter(channel.id()) {
            if self.templates.contains_key(channel.id()) {
                debug!(template = %channel.id(), "Template already declared");
                return Ok(());
            }
            let template = DynamicTemplate::compile(channel)?;
            self.templates
                .insert(template.template().to_string(), Arc::new(template));
            return Ok(());
        }
        channel.validate()?;
        self.attach(channel);
        Ok(())
    }

    /// Inserts a channel by id, replacing any previous one with that id.
    pub fn attach(&mut self, channel: Arc<Channel>) {
        self.system.retain(|existing| existing.id() != channel.id());
        if channel.is_system() {
            self.system.push(Arc::clone(&channel));
        }
        if let Some(previous) = self.channels.insert(channel.id().to_string(), channel) {
            debug!(channel_id = %previous.id(), "Channel replaced");
        }
    }

    /// Exact-id lookup.
    pub fn get(&self, id: &str) -> Option<Arc<Channel>> {
        self.channels.get(id).cloned()
    }

    /// Looks for a template matching `id` on behalf of `requester`.
    ///
    /// The first matching template wins; which one that is among overlapping
    /// templates is undefined.
    pub fn match_template(&self, id: &str, requester: &str) -> TemplateLookup {
        let mut rejected = false;
        for template in self.templates.values() {
            match template.matches(id, requester) {
                TemplateMatch::Matched => return TemplateLookup::Matched(template.instantiate(id)),
                TemplateMatch::OwnerMismatch => rejected = true,
                TemplateMatch::NoMatch => {}
            }
        }
        if rejected {
            TemplateLookup::Rejected
        } else {
            TemplateLookup::Miss
        }
    }

    /// Removes the channel if it is registered under its id and has become
    /// eligible for removal.
    pub fn remove_if_unused(&mut self, channel: &Arc<Channel>) -> bool {
        if !channel.should_be_removed() {
            return false;
        }
        match self.channels.get(channel.id()) {
            Some(registered) if Arc::ptr_eq(registered, channel) => {
                self.channels.remove(channel.id());
                true
            }
            _ => false,
        }
    }

    /// System channels in declaration order.
    pub fn system_channels(&self) -> &[Arc<Channel>] {
        &self.system
    }

    /// Ids of the system channels, as announced in the `sys` message.
    pub fn system_ids(&self) -> Vec<String> {
        self.system.iter().map(|c| c.id().to_string()).collect()
    }

    /// Number of registered channel instances.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Number of dynamic templates.
    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    /// Drops every channel and releases their subscribers.
    pub fn clear(&mut self) {
        for channel in self.channels.values() {
            channel.clear_subscribers();
        }
        self.channels.clear();
        self.system.clear();
        self.templates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_splits_static_and_templates() {
        let mut registry = ChannelRegistry::new();
        registry.declare(Channel::builder("news").system(true).build()).unwrap();
        registry.declare(Channel::builder("rooms/:id").build()).unwrap();
        registry.declare(Channel::builder("rooms/:id").build()).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.template_count(), 1);
        assert_eq!(registry.system_ids(), vec!["news".to_string()]);
        assert!(registry.get("rooms/:id").is_none());
    }

    #[test]
    fn test_declare_rejects_reserved_id() {
        let mut registry = ChannelRegistry::new();
        assert!(registry.declare(Channel::builder("me").build()).is_err());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_match_template_instantiates() {
        let mut registry = ChannelRegistry::new();
        registry.declare(Channel::builder("rooms/:id").build()).unwrap();

        match registry.match_template("rooms/42", "alice") {
            TemplateLookup::Matched(channel) => {
                assert_eq!(channel.id(), "rooms/42");
                assert_eq!(channel.id_param("id"), "42");
            }
            other => panic!("unexpected lookup: {other:?}"),
        }
        assert!(matches!(
            registry.match_template("lobby", "alice"),
            TemplateLookup::Miss
        ));
    }

    #[test]
    fn test_owner_template_rejects_foreign_owner() {
        let mut registry = ChannelRegistry::new();
        registry.declare(Channel::builder("me/:Owner/:doc").build()).unwrap();

        assert!(matches!(
            registry.match_template("me/alice/report1", "bob"),
            TemplateLookup::Rejected
        ));
        assert!(matches!(
            registry.match_template("me/alice/report1", "alice"),
            TemplateLookup::Matched(_)
        ));
    }

    #[test]
    fn test_remove_if_unused_skips_system_and_replaced() {
        let mut registry = ChannelRegistry::new();
        let news = Channel::builder("news").system(true).build();
        let lobby = Channel::builder("lobby").build();
        registry.attach(Arc::clone(&news));
        registry.attach(Arc::clone(&lobby));

        assert!(!registry.remove_if_unused(&news));

        let stale = Channel::builder("lobby").build();
        assert!(!registry.remove_if_unused(&stale));
        assert!(registry.remove_if_unused(&lobby));
        assert!(registry.get("lobby").is_none());
        assert!(registry.get("news").is_some());
    }
}
