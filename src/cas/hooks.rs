//! Ordered post-validation hooks.
//!
//! Hooks are registered once while building the application state and run in
//! registration order on every successful validation. The first hook that
//! aborts stops the chain; later hooks never see the identity.

use std::fmt;
use tracing::{debug, warn};

use super::{attributes::Attributes, error::HookAbort};

pub type Identity = String;

type HookFn = dyn Fn(Identity, Attributes) -> Result<(Identity, Attributes), HookAbort> + Send + Sync;

struct Hook {
    name: String,
    run: Box<HookFn>,
}

#[derive(Default)]
pub struct HookChainBuilder {
    hooks: Vec<Hook>,
}

impl HookChainBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(Identity, Attributes) -> Result<(Identity, Attributes), HookAbort>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.push(Hook {
            name: name.into(),
            run: Box::new(hook),
        });
        self
    }

    #[must_use]
    pub fn build(self) -> HookChain {
        HookChain { hooks: self.hooks }
    }
}

/// Immutable once built; share it behind an `Arc`.
#[derive(Default)]
pub struct HookChain {
    hooks: Vec<Hook>,
}

impl HookChain {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.iter().map(|hook| hook.name.as_str())
    }

    /// Feed the pair through every hook in order.
    ///
    /// # Errors
    /// Returns the first abort, tagged with the name of the hook that raised it.
    /// A hook that leaves the identity blank aborts the chain as well.
    pub fn run(
        &self,
        identity: Identity,
        attributes: Attributes,
    ) -> Result<(Identity, Attributes), HookAbort> {
        let mut current = (identity, attributes);
        for hook in &self.hooks {
            debug!(hook = %hook.name, "running login hook");
            current = (hook.run)(current.0, current.1)
                .and_then(|(identity, attributes)| {
                    if identity.trim().is_empty() {
                        Err(HookAbort::new("empty identity"))
                    } else {
                        Ok((identity, attributes))
                    }
                })
                .map_err(|abort| {
                    let abort = abort.in_hook(&hook.name);
                    warn!(hook = %abort.hook, reason = %abort.reason, "login hook aborted");
                    abort
                })?;
        }
        Ok(current)
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Lowercase the identity; CAS servers differ in how they echo usernames.
pub fn lowercase_identity(
    identity: Identity,
    attributes: Attributes,
) -> Result<(Identity, Attributes), HookAbort> {
    Ok((identity.to_lowercase(), attributes))
}

/// Abort unless every named attribute was released by the server.
pub fn require_attributes(
    names: Vec<String>,
) -> impl Fn(Identity, Attributes) -> Result<(Identity, Attributes), HookAbort> + Send + Sync {
    move |identity, attributes| {
        if let Some(missing) = names.iter().find(|name| !attributes.contains_key(*name)) {
            return Err(HookAbort::new(format!("missing attribute {missing}")));
        }
        Ok((identity, attributes))
    }
}
