// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use log::debug;
use thiserror::Error;

use crate::codec::h265::picture::Reference;
use crate::codec::h265::syntax::MAX_DPB_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DpbError {
    #[error("no free slot in the DPB (max_dpb_size is {max_dpb_size})")]
    Overflow { max_dpb_size: usize },
    #[error("DPB fullness went below zero")]
    FullnessUnderflow,
    #[error("DPB slot {0} is out of bounds")]
    InvalidSlot(usize),
}

/// One picture storage buffer of the DPB.
///
/// `handle` is the backend resource holding the decoded samples. The DPB
/// never creates nor frees backend resources, it only keeps track of which
/// slot holds which handle.
#[derive(Clone, Debug)]
pub struct DpbSlot<T> {
    pub reference: Reference,
    /// PicOrderCntVal of the picture held by the slot.
    pub pic_order_cnt_val: i32,
    /// slice_pic_order_cnt_lsb of the picture held by the slot. Long-term
    /// references signaled without their MSB are looked up by this value.
    pub slice_pic_order_cnt_lsb: i32,
    /// Whether the picture is "needed for output".
    pub needed_for_output: bool,
    pub handle: Option<T>,
    /// Whether the slot is counted in the DPB fullness.
    occupied: bool,
}

impl<T> Default for DpbSlot<T> {
    fn default() -> Self {
        Self {
            reference: Default::default(),
            pic_order_cnt_val: 0,
            slice_pic_order_cnt_lsb: 0,
            needed_for_output: false,
            handle: None,
            occupied: false,
        }
    }
}

impl<T> DpbSlot<T> {
    /// Whether the current picture is a reference, either ShortTerm or LongTerm.
    pub fn is_ref(&self) -> bool {
        !matches!(self.reference, Reference::None)
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied
    }

    /// Whether the slot can be handed to a new picture.
    pub fn is_free(&self) -> bool {
        !self.occupied && !self.is_ref() && !self.needed_for_output
    }

    fn clear(&mut self) {
        *self = Default::default();
    }
}

/// A fixed pool of `MAX_DPB_SIZE` picture slots, of which the first
/// `max_dpb_size` can be used.
pub struct Dpb<T> {
    slots: [DpbSlot<T>; MAX_DPB_SIZE],
    /// MaxDpbSize for the current sequence.
    max_dpb_size: usize,
    /// Number of occupied slots.
    fullness: usize,
}

impl<T> Default for Dpb<T> {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| Default::default()),
            max_dpb_size: MAX_DPB_SIZE,
            fullness: 0,
        }
    }
}

impl<T> Dpb<T> {
    pub fn new(max_dpb_size: usize) -> Self {
        let mut dpb = Self::default();
        dpb.set_max_dpb_size(max_dpb_size);
        dpb
    }

    /// Set the dpb's max size. Values above `MAX_DPB_SIZE` are clamped.
    pub fn set_max_dpb_size(&mut self, max_dpb_size: usize) {
        self.max_dpb_size = std::cmp::min(max_dpb_size, MAX_DPB_SIZE);
    }

    /// Get the dpb's max size.
    pub fn max_dpb_size(&self) -> usize {
        self.max_dpb_size
    }

    /// Number of occupied slots.
    pub fn fullness(&self) -> usize {
        self.fullness
    }

    /// All the slots, including the ones beyond `max_dpb_size`.
    pub fn slots(&self) -> &[DpbSlot<T>] {
        &self.slots
    }

    /// The slots usable for the current sequence.
    pub fn active_slots(&self) -> &[DpbSlot<T>] {
        &self.slots[..self.max_dpb_size]
    }

    pub fn slot(&self, index: usize) -> Result<&DpbSlot<T>, DpbError> {
        self.slots.get(index).ok_or(DpbError::InvalidSlot(index))
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut DpbSlot<T>, DpbError> {
        self.slots.get_mut(index).ok_or(DpbError::InvalidSlot(index))
    }

    /// Mark all pictures in the DPB as unused for reference.
    pub fn mark_all_as_unused_for_ref(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.reference = Reference::None;
        }
    }

    /// Changes the marking of the picture in `index`.
    pub fn set_reference(&mut self, index: usize, reference: Reference) -> Result<(), DpbError> {
        let slot = self.slot_mut(index)?;
        debug!(
            "Set reference of slot {} (POC {}) to {:?}",
            index, slot.pic_order_cnt_val, reference
        );
        slot.reference = reference;
        Ok(())
    }

    fn find(&self, predicate: impl Fn(&DpbSlot<T>) -> bool) -> Option<usize> {
        self.active_slots().iter().position(predicate)
    }

    /// Finds a reference picture in the DPB using `poc`.
    pub fn find_ref_by_poc(&self, poc: i32) -> Option<usize> {
        let position = self.find(|s| s.is_ref() && s.pic_order_cnt_val == poc);
        debug!("find_ref_by_poc: {}, found position {:?}", poc, position);
        position
    }

    /// Finds a reference picture in the DPB whose slice_pic_order_cnt_lsb is
    /// `poc_lsb`.
    pub fn find_ref_by_poc_lsb(&self, poc_lsb: i32) -> Option<usize> {
        let position = self.find(|s| s.is_ref() && s.slice_pic_order_cnt_lsb == poc_lsb);
        debug!(
            "find_ref_by_poc_lsb: {}, found position {:?}",
            poc_lsb, position
        );
        position
    }

    /// Finds a short term reference picture in the DPB using `poc`.
    pub fn find_short_term_ref_by_poc(&self, poc: i32) -> Option<usize> {
        let position = self.find(|s| {
            matches!(s.reference, Reference::ShortTerm) && s.pic_order_cnt_val == poc
        });
        debug!(
            "find_short_term_ref_by_poc: {}, found position {:?}",
            poc, position
        );
        position
    }

    /// Marks every slot in `0..max_dpb_size` that is not in `in_use` as unused
    /// for reference.
    pub fn mark_unused_except(&mut self, in_use: &[usize]) {
        let max_dpb_size = self.max_dpb_size;
        for (index, slot) in self.slots[..max_dpb_size].iter_mut().enumerate() {
            if slot.is_ref() && !in_use.contains(&index) {
                debug!(
                    "Marking slot {} (POC {}) as unused for reference",
                    index, slot.pic_order_cnt_val
                );
                slot.reference = Reference::None;
            }
        }
    }

    /// Drops every picture, whether it is needed for output or for reference.
    /// This is what happens when NoOutputOfPriorPicsFlag is set. See C.3.2.
    pub fn clear(&mut self) {
        debug!("Clearing the DPB");

        for slot in self.slots.iter_mut() {
            slot.clear();
        }
        self.fullness = 0;
    }

    /// Removes all pictures which are marked as "not needed for output" and
    /// "unused for reference", returning how many were removed. See C.3.2.
    pub fn remove_unused(&mut self) -> Result<usize, DpbError> {
        let mut removed = 0;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if !slot.occupied || slot.is_ref() || slot.needed_for_output {
                continue;
            }

            debug!(
                "Removing slot {} (POC {}) from the DPB",
                index, slot.pic_order_cnt_val
            );

            slot.clear();
            self.fullness = self
                .fullness
                .checked_sub(1)
                .ok_or(DpbError::FullnessUnderflow)?;
            removed += 1;
        }

        Ok(removed)
    }

    /// Finds the lowest free slot, marks it as used for short-term reference
    /// and returns its index. See C.3.4.
    pub fn allocate(&mut self) -> Result<usize, DpbError> {
        let max_dpb_size = self.max_dpb_size;
        let index = self
            .find(|s| s.is_free())
            .ok_or(DpbError::Overflow { max_dpb_size })?;

        if self.fullness >= max_dpb_size {
            return Err(DpbError::Overflow { max_dpb_size });
        }

        let slot = &mut self.slots[index];
        slot.clear();
        slot.reference = Reference::ShortTerm;
        slot.occupied = true;
        self.fullness += 1;

        debug!(
            "Allocated slot {}, the DPB fullness is {}",
            index, self.fullness
        );

        Ok(index)
    }

    /// Sets whether the picture in `index` is needed for output.
    pub fn set_needed_for_output(&mut self, index: usize, needed: bool) -> Result<(), DpbError> {
        self.slot_mut(index)?.needed_for_output = needed;
        Ok(())
    }

    /// Stores a decoded picture and its backend handle in the previously
    /// allocated slot `index`.
    pub fn store_picture(
        &mut self,
        index: usize,
        pic_order_cnt_val: i32,
        slice_pic_order_cnt_lsb: i32,
        handle: T,
    ) -> Result<(), DpbError> {
        let slot = self.slot_mut(index)?;
        if !slot.occupied {
            return Err(DpbError::InvalidSlot(index));
        }

        slot.pic_order_cnt_val = pic_order_cnt_val;
        slot.slice_pic_order_cnt_lsb = slice_pic_order_cnt_lsb;
        slot.handle = Some(handle);

        debug!(
            "Stored picture POC {} in slot {}, the DPB fullness is {}",
            pic_order_cnt_val, index, self.fullness
        );

        Ok(())
    }

    /// Gives back a slot whose picture could not be decoded.
    pub fn release(&mut self, index: usize) -> Result<(), DpbError> {
        let slot = self.slot_mut(index)?;
        if !slot.occupied {
            return Err(DpbError::InvalidSlot(index));
        }

        slot.clear();
        self.fullness = self
            .fullness
            .checked_sub(1)
            .ok_or(DpbError::FullnessUnderflow)?;

        debug!("Released slot {}", index);
        Ok(())
    }

    /// Number of slots that can still be allocated.
    pub fn num_free_slots(&self) -> usize {
        self.max_dpb_size.saturating_sub(self.fullness)
    }

    /// Returns the handles of all the pictures in the DPB.
    pub fn handles(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.handle.as_ref().map(|h| (i, h)))
    }
}

impl<T> std::fmt::Debug for Dpb<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.occupied)
            .map(|(i, s)| (i, s.pic_order_cnt_val, s.reference, s.needed_for_output))
            .collect::<Vec<_>>();
        f.debug_struct("Dpb")
            .field("slots", &slots)
            .field("max_dpb_size", &self.max_dpb_size)
            .field("fullness", &self.fullness)
            .finish()
    }
}
