//! Splitting and reassembly of large objects.
//!
//! Outgoing items are cut into chunks; the first chunk announces the total
//! size, every chunk carries its offset as `dataPos`. Incoming chunks are
//! appended to a [`PartialItem`] until an item without `MoreData` arrives.

use crate::resume::{PartialItem, ResumeOp};
use syncml_protocol::{Encoding, Item, Meta, StatusCode, SyncOpKind};

/// Items at or below this size are not split unless the remote's MaxObjSize is smaller.
pub const MIN_SPLIT_SIZE: usize = 200;

/// Returns where to cut `data` so that at most `keep` bytes stay in front.
///
/// XML transports text, so the cut moves back to a UTF-8 character boundary
/// when the payload is valid UTF-8. Returns 0 when no cut is possible.
pub fn split_point(data: &[u8], keep: usize, encoding: Encoding) -> usize {
    let keep = keep.min(data.len());
    if encoding == Encoding::Xml && std::str::from_utf8(data).is_ok() {
        let mut at = keep;
        while at > 0 && at < data.len() && (data[at] & 0xC0) == 0x80 {
            at -= 1;
        }
        return at;
    }
    keep
}

/// Result of feeding a chunk into a partial item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// More chunks are expected; answer 213.
    Incomplete,
    /// The item is complete.
    Complete(Vec<u8>),
    /// The item is broken; answer with this status.
    Failed(StatusCode),
}

/// Reassembly state of one incoming item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassembly {
    /// Accumulated data and identification.
    pub partial: PartialItem,
    resumed: Option<ResumedSplice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResumedSplice {
    splice_at: usize,
    unconfirmed: usize,
    saw_data_pos: bool,
}

impl Reassembly {
    /// Starts reassembly from a first chunk.
    ///
    /// # Errors
    ///
    /// Returns 412 when the chunk does not announce the total size.
    pub fn begin(kind: SyncOpKind, item: &Item, cmd_meta: Option<&Meta>) -> Result<Self, StatusCode> {
        let total_size =
            item_size(item, cmd_meta).ok_or(StatusCode::INCOMPLETE_COMMAND)?;
        Ok(Self {
            partial: PartialItem {
                op: ResumeOp::from(kind),
                source_uri: item.source_uri().map(str::to_string),
                target_uri: item.target_uri().map(str::to_string),
                content_type: item
                    .meta
                    .as_ref()
                    .or(cmd_meta)
                    .and_then(|m| m.content_type.clone()),
                total_size,
                data: Vec::new(),
                unconfirmed: 0,
            },
            resumed: None,
        })
    }

    /// Continues a transfer interrupted in a previous session.
    pub fn resume(partial: PartialItem) -> Self {
        let splice_at = partial.data.len();
        let unconfirmed = usize::try_from(partial.unconfirmed).unwrap_or(usize::MAX);
        Self {
            partial,
            resumed: Some(ResumedSplice {
                splice_at,
                unconfirmed,
                saw_data_pos: false,
            }),
        }
    }

    /// Returns true if the item continues this transfer.
    pub fn matches(&self, kind: SyncOpKind, item: &Item) -> bool {
        ResumeOp::from(kind) == self.partial.op
            && item.source_uri() == self.partial.source_uri.as_deref()
            && item.target_uri() == self.partial.target_uri.as_deref()
    }

    /// Returns the number of bytes received.
    pub fn received(&self) -> usize {
        self.partial.data.len()
    }

    /// Adds the next chunk.
    pub fn add_chunk(&mut self, item: &Item, cmd_meta: Option<&Meta>) -> ChunkOutcome {
        let data = item.data.as_deref().unwrap_or_default();
        if let Some(pos) = data_pos(item, cmd_meta) {
            let pos = usize::try_from(pos).unwrap_or(usize::MAX);
            if pos > self.partial.data.len() {
                return ChunkOutcome::Failed(StatusCode::INCOMPLETE_COMMAND);
            }
            self.partial.data.truncate(pos);
            if let Some(resumed) = self.resumed.as_mut() {
                resumed.saw_data_pos = true;
            }
        }
        self.partial.data.extend_from_slice(data);
        self.partial.unconfirmed = data.len() as u64;

        let total = usize::try_from(self.partial.total_size).unwrap_or(usize::MAX);
        if item.more_data {
            // A resent chunk without dataPos may overshoot until the last chunk trims it.
            let slack = match self.resumed {
                Some(resumed) if !resumed.saw_data_pos => resumed.unconfirmed,
                _ => 0,
            };
            if self.partial.data.len() > total.saturating_add(slack) {
                return ChunkOutcome::Failed(StatusCode::SIZE_MISMATCH);
            }
            return ChunkOutcome::Incomplete;
        }
        let received = self.partial.data.len();
        if received == total {
            return ChunkOutcome::Complete(std::mem::take(&mut self.partial.data));
        }
        if let Some(resumed) = self.resumed {
            // The chunk sent right before the suspend arrived twice.
            if !resumed.saw_data_pos
                && received > total
                && received - total == resumed.unconfirmed
                && resumed.splice_at >= resumed.unconfirmed
            {
                let start = resumed.splice_at - resumed.unconfirmed;
                self.partial.data.drain(start..resumed.splice_at);
                return ChunkOutcome::Complete(std::mem::take(&mut self.partial.data));
            }
        }
        ChunkOutcome::Failed(StatusCode::SIZE_MISMATCH)
    }
}

/// Returns the total size announced for an item.
pub fn item_size(item: &Item, cmd_meta: Option<&Meta>) -> Option<u64> {
    item.meta
        .as_ref()
        .and_then(|m| m.size)
        .or_else(|| cmd_meta.and_then(|m| m.size))
}

/// Returns the `dataPos` offset announced for an item.
pub fn data_pos(item: &Item, cmd_meta: Option<&Meta>) -> Option<u64> {
    item.meta
        .as_ref()
        .and_then(Meta::data_pos)
        .or_else(|| cmd_meta.and_then(Meta::data_pos))
}

/// Returns true if the item starts a new transfer rather than continuing one.
pub fn starts_transfer(item: &Item, cmd_meta: Option<&Meta>) -> bool {
    item_size(item, cmd_meta).is_some() && data_pos(item, cmd_meta).unwrap_or(0) == 0
}
