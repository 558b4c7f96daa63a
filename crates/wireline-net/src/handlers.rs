//! Command-keyed handler table.
//!
//! External code registers `command -> handler` functions; sessions invoke
//! them synchronously, one frame at a time, in arrival order. A handler's
//! `Ok(Some(reply))` is sent back; `Ok(None)` means no reply.

use std::collections::HashMap;
use std::sync::Arc;

use wireline_message::Message;

use crate::error::Result;
use crate::session::SessionInfo;

/// One registered handler.
pub type Handler = Arc<dyn Fn(&SessionInfo, &Message) -> Result<Option<Message>> + Send + Sync>;

/// Maps command strings to handlers, with an optional catch-all invoked
/// for commands with no specific registration.
#[derive(Clone, Default)]
pub struct HandlerTable {
    by_command: HashMap<String, Handler>,
    catch_all: Option<Handler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one command, replacing any previous one.
    pub fn on_command<F>(&mut self, command: impl Into<String>, handler: F)
    where
        F: Fn(&SessionInfo, &Message) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        self.by_command.insert(command.into(), Arc::new(handler));
    }

    /// Register the catch-all for otherwise-unmatched messages.
    pub fn on_unmatched<F>(&mut self, handler: F)
    where
        F: Fn(&SessionInfo, &Message) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        self.catch_all = Some(Arc::new(handler));
    }

    /// The handler registered for `command`, if any.
    pub fn resolve(&self, command: &str) -> Option<Handler> {
        self.by_command.get(command).cloned()
    }

    /// The catch-all handler, if any.
    pub fn unmatched(&self) -> Option<Handler> {
        self.catch_all.clone()
    }

    /// True if a specific handler is registered for `command`.
    pub fn handles(&self, command: &str) -> bool {
        self.by_command.contains_key(command)
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut commands: Vec<&String> = self.by_command.keys().collect();
        commands.sort();
        f.debug_struct("HandlerTable")
            .field("commands", &commands)
            .field("catch_all", &self.catch_all.is_some())
            .finish()
    }
}
