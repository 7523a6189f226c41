use std::collections::VecDeque;

use basalt_backend::ServerError;
use bson::{Bson, Document, doc};
use dashmap::DashMap;

/// Opaque client channel identifier, surfaced as `connectionId` in error
/// documents.
pub type ChannelId = i32;

const CAPACITY: usize = 10;

/// Bounded per-channel ring of recent command results.
///
/// A `None` entry is the pending sentinel: a command was dispatched but its
/// result was never recorded (reads and admin commands leave it behind).
/// Write helpers push their own sentinel and must find it still pending when
/// they record the outcome.
pub(crate) struct LastResults {
    channels: DashMap<ChannelId, VecDeque<Option<Document>>>,
}

impl LastResults {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Append the pending sentinel, evicting the oldest entry past capacity.
    pub fn append_pending(&self, channel: ChannelId) {
        let mut list = self.channels.entry(channel).or_default();
        if list.len() == CAPACITY {
            list.pop_front();
        }
        list.push_back(None);
    }

    /// Replace the pending sentinel with a write result. Finding anything
    /// else in the slot is an internal error.
    pub fn record_result(&self, channel: ChannelId, result: Document) -> Result<(), ServerError> {
        let mut list = self.channels.entry(channel).or_default();
        match list.back_mut() {
            Some(slot) if slot.is_none() => {
                *slot = Some(result);
                Ok(())
            }
            _ => Err(ServerError::failed(format!(
                "last result already set on channel {channel}"
            ))),
        }
    }

    /// Record a write failure. The pending slot takes it when present.
    pub fn record_error(&self, channel: ChannelId, error: Document) {
        let mut list = self.channels.entry(channel).or_default();
        match list.back_mut() {
            Some(slot) if slot.is_none() => *slot = Some(error),
            _ => {
                if list.len() == CAPACITY {
                    list.pop_front();
                }
                list.push_back(Some(error));
            }
        }
    }

    /// `getlasterror`: the most recent recorded entry. Never mutates.
    pub fn last_error(&self, channel: ChannelId) -> Document {
        if let Some(list) = self.channels.get(&channel) {
            for entry in list.iter().rev() {
                if let Some(result) = entry {
                    return result.clone();
                }
            }
        }
        doc! { "err": Bson::Null }
    }

    /// `getpreverror`: scan below the newest entry for the first result
    /// carrying an error or a non-zero `n`, tagged with its 1-based
    /// distance from the top.
    pub fn prev_error(&self, channel: ChannelId) -> Document {
        if let Some(list) = self.channels.get(&channel) {
            let len = list.len();
            for distance in 1..len {
                let Some(result) = &list[len - 1 - distance] else {
                    continue;
                };
                let has_error = result.get("err").is_some_and(|e| !matches!(e, Bson::Null));
                if has_error || nonzero_count(result) {
                    let mut tagged = result.clone();
                    tagged.insert("nPrev", distance as i32);
                    return tagged;
                }
            }
        }
        doc! { "nPrev": -1 }
    }

    /// `reseterror`: truncate the channel's history.
    pub fn reset(&self, channel: ChannelId) {
        if let Some(mut list) = self.channels.get_mut(&channel) {
            list.clear();
        }
    }

    /// Channel close drops the history entirely.
    pub fn remove_channel(&self, channel: ChannelId) {
        self.channels.remove(&channel);
    }
}

fn nonzero_count(result: &Document) -> bool {
    match result.get("n") {
        Some(Bson::Int32(n)) => *n != 0,
        Some(Bson::Int64(n)) => *n != 0,
        Some(Bson::Double(n)) => *n != 0.0,
        _ => false,
    }
}
