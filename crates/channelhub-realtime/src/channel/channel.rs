//! Single channel with rights, subscriber tracking and fan-out.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::connection::handle::{ClientInfo, Connection, ConnectionId};
use crate::error::{HubError, HubResult};
use crate::message::types::{ChannelDef, HubMessage, Payload, RESERVED_CHANNEL_ID};
use crate::notification::listener::{BeforeBroadcast, LifecycleListeners};

use super::dynamic::{DynamicTemplate, OWNER_PARAM};
use super::rights::{Access, Requester};

/// A named, access-controlled broadcast group.
///
/// Three kinds of channels are told apart by their id:
///
/// | kind    | example              | behaviour                                         |
/// |---------|----------------------|---------------------------------------------------|
/// | static  | `news`               | one channel, one configuration                    |
/// | dynamic | `rooms/:id`          | one instance per matching id, see [`Channel::id_param`] |
/// | owner   | `me/:Owner/:doc`     | only matches ids whose owner segment is the requester |
///
/// Membership is only changed by the hub control loop, but the subscriber
/// set has its own lock so that [`Channel::broadcast`] may be called from
/// any task holding a channel reference.
pub struct Channel {
    id: String,
    system: bool,
    access: RwLock<Access>,
    template: Option<Arc<DynamicTemplate>>,
    params: HashMap<String, String>,
    listeners: LifecycleListeners,
    before_broadcast: Option<BeforeBroadcast>,
    subscribers: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("system", &self.system)
            .field("dynamic", &self.is_dynamic())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Channel {
    /// Starts declaring a channel.
    pub fn builder(id: impl Into<String>) -> ChannelBuilder {
        ChannelBuilder {
            def: ChannelDef::new(id),
            listeners: LifecycleListeners::default(),
            before_broadcast: None,
        }
    }

    /// Builds a channel from its JSON model.
    pub fn from_def(def: ChannelDef) -> Arc<Self> {
        ChannelBuilder {
            def,
            listeners: LifecycleListeners::default(),
            before_broadcast: None,
        }
        .build()
    }

    pub(crate) fn instantiate(
        &self,
        id: &str,
        template: Arc<DynamicTemplate>,
        params: HashMap<String, String>,
    ) -> Self {
        let mut access = self.access();
        if access.owner.is_empty() && template.is_owner_template() {
            if let Some(owner) = params.get(OWNER_PARAM) {
                access.owner = owner.clone();
            }
        }
        Self {
            id: id.to_string(),
            system: self.system,
            access: RwLock::new(access),
            template: Some(template),
            params,
            listeners: self.listeners.clone(),
            before_broadcast: self.before_broadcast.clone(),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Channel id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// System channels are auto-subscribed, read-only for clients and never removed.
    pub fn is_system(&self) -> bool {
        self.system
    }

    /// Whether this channel was instantiated from a dynamic template.
    pub fn is_dynamic(&self) -> bool {
        self.template.is_some()
    }

    /// The template this channel was instantiated from.
    pub fn template(&self) -> Option<&Arc<DynamicTemplate>> {
        self.template.as_ref()
    }

    /// Named parameter of a dynamic channel id, or `""`.
    ///
    /// For a template `chat:p1` and runtime id `chatABC-123`,
    /// `id_param("p1")` is `"ABC-123"`.
    pub fn id_param(&self, name: &str) -> &str {
        self.params.get(name).map(String::as_str).unwrap_or("")
    }

    /// Snapshot of ownership and permissions.
    pub fn access(&self) -> Access {
        self.access.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Current owner identity.
    pub fn owner(&self) -> String {
        self.access.read().unwrap_or_else(|e| e.into_inner()).owner.clone()
    }

    /// Snapshot of the channel as its JSON model.
    pub fn definition(&self) -> ChannelDef {
        let mut def = ChannelDef::new(self.id.clone());
        def.system = self.system;
        self.access
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .fill_def(&mut def);
        def
    }

    /// Per-channel lifecycle listeners.
    pub fn listeners(&self) -> &LifecycleListeners {
        &self.listeners
    }

    /// Number of subscribed connections.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether anyone is subscribed.
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// Whether a connection is subscribed.
    pub fn is_subscribed(&self, conn_id: ConnectionId) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&conn_id)
    }

    /// Checks the channel is well formed before it is attached to a hub.
    pub fn validate(&self) -> HubResult<()> {
        if self.id.is_empty() {
            return Err(HubError::InvalidChannel("id must be set".to_string()));
        }
        if self.id == RESERVED_CHANNEL_ID {
            return Err(HubError::InvalidChannel(format!(
                "id cannot be '{RESERVED_CHANNEL_ID}'"
            )));
        }
        Ok(())
    }

    /// Read authorization; `None` is the system.
    pub fn is_read_granted(&self, requester: Option<&Requester>) -> bool {
        self.access
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .can_read(requester)
    }

    /// Write authorization; `None` is the system. Clients never write to system channels.
    pub fn is_write_granted(&self, requester: Option<&Requester>) -> bool {
        if requester.is_some() && self.system {
            return false;
        }
        self.access
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .can_write(requester)
    }

    /// Clients may only change permissions of static, non-system channels.
    pub fn allows_permission_changes(&self) -> bool {
        !self.system && !self.is_dynamic()
    }

    /// Applies a client update. The owner may change every field; anyone
    /// with write rights may only merge grant entries.
    ///
    /// Returns whether anything was applied.
    pub fn update_permissions(&self, requester: &Requester, update: &ChannelDef) -> bool {
        if !self.allows_permission_changes() {
            return false;
        }
        let mut access = self.access.write().unwrap_or_else(|e| e.into_inner());
        if access.is_owner(requester) {
            access.apply_owner_update(update);
            return true;
        }
        if update.grant.is_empty() || !access.can_write(Some(requester)) {
            return false;
        }
        access.merge_grant(&update.grant);
        true
    }

    /// Adds a subscriber and records the channel on the connection.
    ///
    /// Returns `false` when the connection was already subscribed.
    pub(crate) fn attach_subscriber(self: &Arc<Self>, conn: &Arc<Connection>) -> bool {
        {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            if subscribers.contains_key(&conn.id()) {
                return false;
            }
            subscribers.insert(conn.id(), Arc::clone(conn));
        }
        conn.track_channel(Arc::clone(self));
        true
    }

    /// Removes a subscriber. System channels only release subscribers on disconnect.
    ///
    /// Returns whether the connection was removed.
    pub(crate) fn detach_subscriber(&self, conn: &Connection, disconnect: bool) -> bool {
        if self.system && !disconnect {
            return false;
        }
        let removed = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&conn.id())
            .is_some();
        if removed {
            conn.untrack_channel(&self.id);
        }
        removed
    }

    /// Non-system channels are removed once nobody is subscribed.
    pub fn should_be_removed(&self) -> bool {
        !self.system && !self.has_subscribers()
    }

    pub(crate) fn clear_subscribers(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn proceed_with_broadcast(&self, msg: &HubMessage) -> bool {
        match &self.before_broadcast {
            Some(hook) => hook(self, msg),
            None => true,
        }
    }

    /// Sends a payload to every subscriber except `except`.
    ///
    /// Returns the number of connections the payload was queued for.
    pub(crate) async fn fan_out(&self, except: Option<ConnectionId>, payload: Payload) -> usize {
        let targets: Vec<Arc<Connection>> = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|conn| Some(conn.id()) != except)
            .cloned()
            .collect();

        let mut delivered = 0;
        for conn in targets {
            if conn.send(Payload::clone(&payload)).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Publishes a client or system message, enforcing write rights and the
    /// before-broadcast hook.
    pub(crate) async fn try_broadcast(
        &self,
        msg: &HubMessage,
        sender: Option<&Arc<Connection>>,
    ) -> usize {
        if !self.has_subscribers() {
            return 0;
        }
        let requester = sender.map(|conn| conn.requester());
        if !self.is_write_granted(requester.as_ref()) {
            debug!(channel_id = %self.id, client_id = %msg.client_id, "Publish denied");
            return 0;
        }
        self.deliver(msg, sender.map(|conn| conn.id())).await
    }

    /// Publishes system data directly, bypassing the hub control queue.
    ///
    /// Must only be triggered by the server, never on behalf of a client.
    pub async fn broadcast(&self, data: Value) -> usize {
        if !self.has_subscribers() {
            return 0;
        }
        let msg = HubMessage::publish(self.id.clone(), data);
        self.deliver(&msg, None).await
    }

    async fn deliver(&self, msg: &HubMessage, except: Option<ConnectionId>) -> usize {
        if !self.proceed_with_broadcast(msg) {
            debug!(channel_id = %self.id, "Broadcast vetoed by hook");
            return 0;
        }
        match msg.to_payload() {
            Ok(payload) => self.fan_out(except, payload).await,
            Err(e) => {
                warn!(channel_id = %self.id, error = %e, "Failed to serialize broadcast");
                0
            }
        }
    }
}

/// Declares a channel before it is handed to the hub.
pub struct ChannelBuilder {
    def: ChannelDef,
    listeners: LifecycleListeners,
    before_broadcast: Option<BeforeBroadcast>,
}

impl ChannelBuilder {
    /// Sets the owner identity.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.def.owner = owner.into();
        self
    }

    /// Sets the group label.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.def.group = group.into();
        self
    }

    /// Sets the four-character rights string.
    pub fn rights(mut self, rights: impl Into<String>) -> Self {
        self.def.rights = rights.into();
        self
    }

    /// Adds a per-identity grant.
    pub fn grant(mut self, identity: impl Into<String>, mode: impl Into<String>) -> Self {
        self.def.grant.insert(identity.into(), mode.into());
        self
    }

    /// Marks the channel as a system channel.
    pub fn system(mut self, system: bool) -> Self {
        self.def.system = system;
        self
    }

    /// Called asynchronously after the channel is created.
    pub fn on_created<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Arc<Channel>, Option<&ClientInfo>) + Send + Sync + 'static,
    {
        self.listeners.created = Some(Arc::new(listener));
        self
    }

    /// Called asynchronously after a client subscribed.
    pub fn on_subscribed<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Arc<Channel>, Option<&ClientInfo>) + Send + Sync + 'static,
    {
        self.listeners.subscribed = Some(Arc::new(listener));
        self
    }

    /// Called asynchronously after a client unsubscribed.
    pub fn on_unsubscribed<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Arc<Channel>, Option<&ClientInfo>) + Send + Sync + 'static,
    {
        self.listeners.unsubscribed = Some(Arc::new(listener));
        self
    }

    /// Called asynchronously after the channel was removed.
    pub fn on_removed<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Arc<Channel>, Option<&ClientInfo>) + Send + Sync + 'static,
    {
        self.listeners.removed = Some(Arc::new(listener));
        self
    }

    /// Synchronous hook run before each publish; returning `false` vetoes it.
    pub fn before_broadcast<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Channel, &HubMessage) -> bool + Send + Sync + 'static,
    {
        self.before_broadcast = Some(Arc::new(hook));
        self
    }

    /// Finishes the declaration. Rights and grants are normalized here.
    pub fn build(self) -> Arc<Channel> {
        let system = self.def.system;
        Arc::new(Channel {
            access: RwLock::new(Access::from_def(&self.def, system)),
            id: self.def.id,
            system,
            template: None,
            params: HashMap::new(),
            listeners: self.listeners,
            before_broadcast: self.before_broadcast,
            subscribers: Mutex::new(HashMap::new()),
        })
    }
}
