//! Offset-sorted fragment chain with a cached first-gap cursor.
//!
//! The list keeps two derived values alongside the items:
//!
//! - `contiguous_len`: bytes covered without a hole starting at offset 0
//! - `first_gap`: index of the item just before the first hole (or the tail)
//!
//! Insertions resume scanning from the cursor, so mostly-ordered captures stay
//! near linear. Every mutation goes through this type, which either advances
//! the cursor or recomputes it; [`FragmentList::gap_is_consistent`] checks the
//! result against a from-scratch computation.

use std::slice;

use super::fragment::FragmentItem;

/// Sorted fragments of one datagram.
#[derive(Debug, Clone, Default)]
pub struct FragmentList {
    items: Vec<FragmentItem>,
    first_gap: Option<usize>,
    contiguous_len: u32,
}

impl FragmentList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, FragmentItem> {
        self.items.iter()
    }

    pub fn items(&self) -> &[FragmentItem] {
        &self.items
    }

    /// Mutable access for flag and data updates. Callers must not change
    /// `offset` or `len` through this.
    pub(crate) fn items_mut(&mut self) -> &mut [FragmentItem] {
        &mut self.items
    }

    pub fn last(&self) -> Option<&FragmentItem> {
        self.items.last()
    }

    /// Bytes covered from offset 0 without a gap.
    pub fn contiguous_len(&self) -> u32 {
        self.contiguous_len
    }

    /// Index of the item just before the first gap.
    pub fn first_gap(&self) -> Option<usize> {
        self.first_gap
    }

    /// Insert one fragment, after any existing fragments at the same offset.
    ///
    /// Returns the index the fragment landed at.
    pub fn insert(&mut self, item: FragmentItem) -> usize {
        let start = match self.first_gap {
            Some(gap) if item.offset >= self.items[gap].offset => gap,
            _ => 0,
        };
        let pos = start + self.items[start..].partition_point(|f| f.offset <= item.offset);
        self.items.insert(pos, item);

        if let Some(gap) = self.first_gap {
            if pos <= gap {
                self.first_gap = Some(gap + 1);
            }
        }
        self.update_first_gap(pos, false);
        pos
    }

    /// Merge a batch of fragments sorted by offset.
    ///
    /// Existing fragments win ties. The cursor is updated once, starting from
    /// the first merged-in fragment.
    pub fn merge(&mut self, incoming: Vec<FragmentItem>) {
        if incoming.is_empty() {
            return;
        }
        debug_assert!(incoming.windows(2).all(|w| w[0].offset <= w[1].offset));

        let existing = std::mem::take(&mut self.items);
        let mut merged = Vec::with_capacity(existing.len() + incoming.len());
        let mut first_inserted = None;
        let mut old = existing.into_iter().peekable();
        let mut new = incoming.into_iter().peekable();

        loop {
            let take_old = match (old.peek(), new.peek()) {
                (Some(a), Some(b)) => a.offset <= b.offset,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_old { old.next() } else { new.next() };
            if let Some(item) = next {
                if !take_old && first_inserted.is_none() {
                    first_inserted = Some(merged.len());
                }
                merged.push(item);
            }
        }

        self.items = merged;
        if let Some(idx) = first_inserted {
            self.update_first_gap(idx, true);
        }
    }

    /// Remove and return every fragment at or after `offset`.
    pub fn split_off_from(&mut self, offset: u32) -> Vec<FragmentItem> {
        let idx = self.items.partition_point(|f| f.offset < offset);
        let tail = self.items.split_off(idx);
        match self.first_gap {
            // Everything removed sat after the cursor
            Some(gap) if gap < idx => {}
            _ => self.recompute_gap(),
        }
        tail
    }

    /// Drop fragments starting at or past `len` and clip the ones crossing it.
    pub fn truncate(&mut self, len: u32) -> Vec<FragmentItem> {
        let removed = self.split_off_from(len);
        for item in &mut self.items {
            if item.end() > len {
                item.len = len - item.offset;
                item.data = item
                    .data
                    .take()
                    .and_then(|d| d.subview(0, (item.len as usize).min(d.len())));
            }
        }
        self.recompute_gap();
        removed
    }

    /// Recompute the cursor from the start of the list.
    pub fn recompute_gap(&mut self) {
        self.first_gap = None;
        self.contiguous_len = 0;
        if self.items.first().map(|f| f.offset == 0).unwrap_or(false) {
            self.update_first_gap(0, false);
        }
    }

    /// Whether the cached cursor matches a from-scratch computation.
    pub fn gap_is_consistent(&self) -> bool {
        let mut fresh = Self {
            items: Vec::new(),
            first_gap: None,
            contiguous_len: 0,
        };
        // Only offsets and lengths matter for the cursor
        fresh.items = self
            .items
            .iter()
            .map(|f| FragmentItem::new(f.frame, f.offset, f.len, None))
            .collect();
        fresh.recompute_gap();
        fresh.first_gap == self.first_gap && fresh.contiguous_len == self.contiguous_len
    }

    fn update_first_gap(&mut self, inserted: usize, multi_insert: bool) {
        let item = &self.items[inserted];
        if item.offset > self.contiguous_len {
            // Lands beyond the first gap
            return;
        }

        let (mut idx, mut contiguous) = match self.first_gap {
            None => {
                if item.offset != 0 {
                    return;
                }
                (inserted, item.len)
            }
            Some(gap) => {
                let from = if multi_insert { inserted } else { gap };
                (from, self.contiguous_len.max(item.end()))
            }
        };

        while let Some(next) = self.items.get(idx + 1) {
            if next.offset > contiguous {
                break;
            }
            idx += 1;
            contiguous = contiguous.max(next.end());
        }

        self.first_gap = Some(idx);
        self.contiguous_len = contiguous;
    }
}

impl<'a> IntoIterator for &'a FragmentList {
    type Item = &'a FragmentItem;
    type IntoIter = slice::Iter<'a, FragmentItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
