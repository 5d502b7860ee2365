//! Named channel lookup with explicit scoping.
//!
//! A [`ChannelRegistry`] is a keyed factory: the first `get_or_create`
//! for a name builds the channel and fixes its options, every later call
//! with the same name returns the same handle. Registries are plain
//! values handed around by the application; there is no ambient
//! "current scope" anywhere in the crate.
//!
//! Scopes nest. A child built with [`child_of`](ChannelRegistry::child_of)
//! sees every parent name; [`child_with`](ChannelRegistry::child_with)
//! restricts inheritance to an explicit name list, which isolates
//! everything else. Channels created in a child stay invisible to the
//! parent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::channel::{Channel, ChannelOptions};
use crate::error::ChannelError;
use crate::runtime::Runtime;
use crate::sync::Mutex;

/// A scope of named channels over one element type.
pub struct ChannelRegistry<T: Send + 'static> {
  runtime: Arc<Runtime>,
  channels: Mutex<HashMap<String, Channel<T>>>,
  parent: Option<Arc<ChannelRegistry<T>>>,
  /// `None` inherits every parent name; `Some` restricts to the listed
  /// ones.
  inherited: Option<HashSet<String>>,
}

impl<T: Send + 'static> ChannelRegistry<T> {
  /// A root scope.
  pub fn new(runtime: Arc<Runtime>) -> Arc<ChannelRegistry<T>> {
    Arc::new(ChannelRegistry {
      runtime,
      channels: Mutex::new(HashMap::new()),
      parent: None,
      inherited: None,
    })
  }

  /// A child scope that sees every name of `parent`.
  pub fn child_of(parent: &Arc<ChannelRegistry<T>>) -> Arc<ChannelRegistry<T>> {
    Arc::new(ChannelRegistry {
      runtime: Arc::clone(&parent.runtime),
      channels: Mutex::new(HashMap::new()),
      parent: Some(Arc::clone(parent)),
      inherited: None,
    })
  }

  /// A child scope that inherits only the listed names from `parent`.
  pub fn child_with(
    parent: &Arc<ChannelRegistry<T>>,
    names: &[&str],
  ) -> Arc<ChannelRegistry<T>> {
    Arc::new(ChannelRegistry {
      runtime: Arc::clone(&parent.runtime),
      channels: Mutex::new(HashMap::new()),
      parent: Some(Arc::clone(parent)),
      inherited: Some(names.iter().map(|n| n.to_string()).collect()),
    })
  }

  /// Looks `name` up in this scope, then along the inherited chain.
  pub fn get(&self, name: &str) -> Option<Channel<T>> {
    if let Some(found) = self.channels.lock().get(name) {
      return Some(found.clone());
    }
    self.lookup_inherited(name)
  }

  /// Returns the channel registered under `name`, creating it with
  /// `options` if this is the first sighting. Options of an existing
  /// channel are left untouched; creation fixes them.
  pub fn get_or_create(
    &self,
    name: &str,
    options: ChannelOptions,
  ) -> Result<Channel<T>, ChannelError> {
    if let Some(inherited) = self.lookup_inherited(name) {
      return Ok(inherited);
    }

    let mut channels = self.channels.lock();
    if let Some(found) = channels.get(name) {
      return Ok(found.clone());
    }
    let channel =
      Channel::new(&self.runtime, options.name(name.to_string()))?;
    channels.insert(name.to_string(), channel.clone());
    tracing::debug!(name, "registered channel");
    Ok(channel)
  }

  /// Number of channels registered directly in this scope.
  pub fn len(&self) -> usize {
    self.channels.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lookup_inherited(&self, name: &str) -> Option<Channel<T>> {
    let parent = self.parent.as_ref()?;
    if let Some(allowed) = &self.inherited {
      if !allowed.contains(name) {
        return None;
      }
    }
    parent.get(name)
  }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
