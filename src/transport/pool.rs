use std::{collections::HashMap, hash::Hash, sync::Arc};

use log::{debug, trace};
use parking_lot::Mutex;

use super::Channel;
use crate::message::Protocol;

/// Idle channels grouped by a pool key.
///
/// A channel is checked out with [ChannelPool::acquire] for the duration of
/// one write and handed back with [ChannelPool::release]. Dead channels are
/// dropped instead of being returned.
pub struct ChannelPool<K, P: Protocol> {
    idle: Mutex<HashMap<K, Vec<Arc<Channel<P>>>>>,
    live: Mutex<Vec<Arc<Channel<P>>>>,
}

impl<K: Eq + Hash + Clone, P: Protocol> ChannelPool<K, P> {
    pub fn new() -> Self {
        ChannelPool {
            idle: Mutex::new(HashMap::new()),
            live: Mutex::new(Vec::new()),
        }
    }

    /// Checks out an open idle channel for `key`, if there is one.
    pub fn acquire(&self, key: &K) -> Option<Arc<Channel<P>>> {
        let mut idle = self.idle.lock();
        let channels = idle.get_mut(key)?;
        while let Some(channel) = channels.pop() {
            if channel.is_open() {
                trace!("reusing channel {}", channel);
                return Some(channel);
            }
            debug!("dropping dead channel {}", channel);
        }
        None
    }

    pub fn release(&self, key: K, channel: Arc<Channel<P>>) {
        if !channel.is_open() {
            debug!("not returning closed channel {} to the pool", channel);
            return;
        }
        self.idle.lock().entry(key).or_default().push(channel);
    }

    /// Remembers a freshly created channel so [ChannelPool::close_all] can
    /// reach it even while it is checked out.
    pub fn track(&self, channel: &Arc<Channel<P>>) {
        let mut live = self.live.lock();
        live.retain(|channel| channel.is_open());
        live.push(Arc::clone(channel));
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().values().map(Vec::len).sum()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().iter().filter(|channel| channel.is_open()).count()
    }

    pub async fn close_all(&self) {
        self.idle.lock().clear();
        let channels: Vec<_> = self.live.lock().drain(..).collect();
        if !channels.is_empty() {
            debug!("closing {} channel(s)", channels.len());
        }
        for channel in channels {
            channel.close().await;
        }
    }
}

impl<K: Eq + Hash + Clone, P: Protocol> Default for ChannelPool<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P: Protocol> Drop for ChannelPool<K, P> {
    fn drop(&mut self) {
        for channel in self.live.get_mut().drain(..) {
            channel.abort_reader();
        }
    }
}
