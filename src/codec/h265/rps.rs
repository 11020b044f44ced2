// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reference picture set derivation and picture marking. See 8.3.2.

use anyhow::anyhow;
use anyhow::Context;

use crate::codec::h265::dpb::Dpb;
use crate::codec::h265::picture::PictureData;
use crate::codec::h265::picture::Reference;
use crate::codec::h265::syntax::ShortTermRefPicSet;
use crate::codec::h265::syntax::SliceHeader;
use crate::codec::h265::syntax::Sps;
use crate::codec::h265::syntax::MAX_DPB_SIZE;

/// A POC list of the RPS, along with the DPB slots its entries resolved to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct RpsList {
    num: usize,
    poc: [i32; MAX_DPB_SIZE],
    delta_poc_msb_present_flag: [bool; MAX_DPB_SIZE],
    /// `None` is "no reference picture".
    refs: [Option<usize>; MAX_DPB_SIZE],
}

impl RpsList {
    fn push(&mut self, poc: i32, delta_poc_msb_present_flag: bool) -> anyhow::Result<()> {
        if self.num >= MAX_DPB_SIZE {
            return Err(anyhow!("more than {} entries in an RPS list", MAX_DPB_SIZE));
        }

        self.poc[self.num] = poc;
        self.delta_poc_msb_present_flag[self.num] = delta_poc_msb_present_flag;
        self.num += 1;
        Ok(())
    }

    fn pocs(&self) -> &[i32] {
        &self.poc[..self.num]
    }

    fn refs(&self) -> &[Option<usize>] {
        &self.refs[..self.num]
    }
}

/// Identifies the Foll lists, which hold references kept for pictures that
/// follow the current one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FollList {
    ShortTerm,
    LongTerm,
}

/// An entry of a Foll list whose picture is not in the DPB.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MissingRef {
    pub list: FollList,
    /// Position in the list.
    pub position: usize,
    pub poc: i32,
}

impl MissingRef {
    /// The marking a picture generated for this entry gets.
    pub fn reference(&self) -> Reference {
        match self.list {
            FollList::ShortTerm => Reference::ShortTerm,
            FollList::LongTerm => Reference::LongTerm,
        }
    }
}

/// The RefPicSet data, derived once per picture.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicSet {
    st_curr_before: RpsList,
    st_curr_after: RpsList,
    st_foll: RpsList,
    lt_curr: RpsList,
    lt_foll: RpsList,

    /// Same as NumPicTotalCurr in ITU-T H.265.
    num_poc_total_curr: usize,
    /// NumDeltaPocs of the RPS the slice RPS is predicted from, or 0.
    num_delta_pocs_of_ref_rps_idx: usize,
}

impl RefPicSet {
    /// Derives the RPS of `pic` and marks the pictures of `dpb` accordingly.
    ///
    /// Pictures that cannot be found are logged and left as `None` in the
    /// lists: decoding goes on without them.
    pub fn derive<T>(
        dpb: &mut Dpb<T>,
        pic: &PictureData,
        sps: &Sps,
        hdr: &SliceHeader,
    ) -> anyhow::Result<Self> {
        // The DPB is left untouched if the slice header is malformed.
        let mut rps = if pic.idr_flag {
            Self::default()
        } else {
            Self::new_from_slice(pic, sps, hdr)?
        };

        // When the current picture is an IRAP picture with NoRaslOutputFlag
        // equal to 1, all reference pictures currently in the DPB are marked
        // as "unused for reference".
        if pic.rap_flag && pic.no_rasl_output_flag {
            dpb.mark_all_as_unused_for_ref();
        }

        if !pic.idr_flag {
            rps.mark(dpb, sps.max_pic_order_cnt_lsb())?;
        }

        Ok(rps)
    }

    // See 8.3.2, Note 2.
    fn st_ref_pic_set<'a>(
        hdr: &'a SliceHeader,
        sps: &'a Sps,
    ) -> anyhow::Result<&'a ShortTermRefPicSet> {
        if hdr.short_term_ref_pic_set_sps_flag {
            let idx = hdr.curr_rps_idx(sps);
            sps.short_term_ref_pic_sets
                .get(idx)
                .with_context(|| format!("Invalid short_term_ref_pic_set_idx {}", idx))
        } else {
            Ok(&hdr.short_term_ref_pic_set)
        }
    }

    /// Builds the five POC lists. Equation 8-5.
    fn new_from_slice(pic: &PictureData, sps: &Sps, hdr: &SliceHeader) -> anyhow::Result<Self> {
        let mut rps = Self::default();
        let curr_poc = pic.pic_order_cnt_val;
        let st_rps = Self::st_ref_pic_set(hdr, sps)?;

        for (i, delta_poc) in st_rps.delta_poc_s0.iter().enumerate() {
            let poc = curr_poc + delta_poc;
            let used = st_rps
                .used_by_curr_pic_s0
                .get(i)
                .copied()
                .context("Missing used_by_curr_pic_s0 entry")?;

            if used {
                rps.st_curr_before.push(poc, false)?;
            } else {
                rps.st_foll.push(poc, false)?;
            }
        }

        for (i, delta_poc) in st_rps.delta_poc_s1.iter().enumerate() {
            let poc = curr_poc + delta_poc;
            let used = st_rps
                .used_by_curr_pic_s1
                .get(i)
                .copied()
                .context("Missing used_by_curr_pic_s1 entry")?;

            if used {
                rps.st_curr_after.push(poc, false)?;
            } else {
                rps.st_foll.push(poc, false)?;
            }
        }

        let max_pic_order_cnt_lsb = sps.max_pic_order_cnt_lsb();
        let num_long_term_sps = usize::from(hdr.num_long_term_sps);

        for i in 0..hdr.num_long_term() {
            // 7.4.7.1 PocLsbLt[i] and UsedByCurrPicLt[i]
            let (poc_lsb_lt, used_by_curr_pic_lt) = if i < num_long_term_sps {
                let lt_idx_sps = hdr
                    .lt_idx_sps
                    .get(i)
                    .copied()
                    .map(usize::from)
                    .context("Missing lt_idx_sps entry")?;
                let poc = sps
                    .lt_ref_pic_poc_lsb_sps
                    .get(lt_idx_sps)
                    .copied()
                    .context("Invalid lt_idx_sps")?;
                let used = sps
                    .used_by_curr_pic_lt_sps_flag
                    .get(lt_idx_sps)
                    .copied()
                    .context("Invalid lt_idx_sps")?;
                (poc, used)
            } else {
                let j = i - num_long_term_sps;
                let poc = hdr
                    .poc_lsb_lt
                    .get(j)
                    .copied()
                    .context("Missing poc_lsb_lt entry")?;
                let used = hdr
                    .used_by_curr_pic_lt_flag
                    .get(j)
                    .copied()
                    .context("Missing used_by_curr_pic_lt_flag entry")?;
                (poc, used)
            };

            let mut poc_lt = i32::try_from(poc_lsb_lt).context("PocLsbLt out of range")?;
            let msb_present = hdr
                .delta_poc_msb_present_flag
                .get(i)
                .copied()
                .unwrap_or(false);

            if msb_present {
                let delta_poc_msb_cycle_lt = hdr
                    .delta_poc_msb_cycle_lt
                    .get(i)
                    .copied()
                    .context("Missing delta_poc_msb_cycle_lt entry")?;
                let delta_poc_msb_cycle_lt =
                    i32::try_from(delta_poc_msb_cycle_lt).context("DeltaPocMsbCycleLt too big")?;

                poc_lt += curr_poc
                    - delta_poc_msb_cycle_lt * max_pic_order_cnt_lsb
                    - pic.slice_pic_order_cnt_lsb;
            }

            if used_by_curr_pic_lt {
                rps.lt_curr.push(poc_lt, msb_present)?;
            } else {
                rps.lt_foll.push(poc_lt, msb_present)?;
            }
        }

        rps.num_poc_total_curr = rps.st_curr_before.num + rps.st_curr_after.num + rps.lt_curr.num;

        // 7.4.8: RefRpsIdx = stRpsIdx - (delta_idx_minus1 + 1). Only the RPS
        // signaled in the slice header is predicted from an SPS candidate.
        if !hdr.short_term_ref_pic_set_sps_flag && st_rps.inter_ref_pic_set_prediction_flag {
            let ref_rps_idx = sps
                .num_short_term_ref_pic_sets()
                .checked_sub(usize::from(st_rps.delta_idx_minus1) + 1)
                .context("Invalid delta_idx_minus1")?;

            rps.num_delta_pocs_of_ref_rps_idx =
                sps.short_term_ref_pic_sets[ref_rps_idx].num_delta_pocs();
        }

        Ok(rps)
    }

    /// Resolves the POC lists against the DPB and marks its pictures. See the
    /// derivation process in the second half of 8.3.2.
    fn mark<T>(&mut self, dpb: &mut Dpb<T>, max_pic_order_cnt_lsb: i32) -> anyhow::Result<()> {
        let lsb_mask = max_pic_order_cnt_lsb - 1;

        // Equation 8-6
        for list in [&mut self.lt_curr, &mut self.lt_foll] {
            for i in 0..list.num {
                let poc = list.poc[i];
                let reference = if list.delta_poc_msb_present_flag[i] {
                    dpb.find_ref_by_poc(poc)
                } else {
                    dpb.find_ref_by_poc_lsb(poc & lsb_mask)
                };

                if reference.is_none() {
                    log::warn!("No long-term reference found for poc {}", poc);
                }

                list.refs[i] = reference;
            }
        }

        for index in self.lt_curr.refs().iter().chain(self.lt_foll.refs()).flatten() {
            dpb.set_reference(*index, Reference::LongTerm)?;
        }

        // Equation 8-7
        for list in [
            &mut self.st_curr_before,
            &mut self.st_curr_after,
            &mut self.st_foll,
        ] {
            for i in 0..list.num {
                let poc = list.poc[i];
                let reference = dpb.find_short_term_ref_by_poc(poc);

                if reference.is_none() {
                    log::warn!("No short-term reference found for poc {}", poc);
                }

                list.refs[i] = reference;
            }
        }

        // All reference pictures in the DPB that are not included in any of
        // the five lists are marked as "unused for reference".
        let in_use = self.in_use();
        dpb.mark_unused_except(&in_use);

        Ok(())
    }

    /// All the DPB slots referenced by one of the five lists.
    fn in_use(&self) -> Vec<usize> {
        self.lt_curr
            .refs()
            .iter()
            .chain(self.lt_foll.refs())
            .chain(self.st_curr_before.refs())
            .chain(self.st_curr_after.refs())
            .chain(self.st_foll.refs())
            .flatten()
            .copied()
            .collect()
    }

    /// RefPicSetStCurrBefore, as DPB slot indices.
    pub fn st_curr_before(&self) -> &[Option<usize>] {
        self.st_curr_before.refs()
    }

    /// RefPicSetStCurrAfter, as DPB slot indices.
    pub fn st_curr_after(&self) -> &[Option<usize>] {
        self.st_curr_after.refs()
    }

    /// RefPicSetLtCurr, as DPB slot indices.
    pub fn lt_curr(&self) -> &[Option<usize>] {
        self.lt_curr.refs()
    }

    /// RefPicSetStFoll, as DPB slot indices.
    pub fn st_foll(&self) -> &[Option<usize>] {
        self.st_foll.refs()
    }

    /// RefPicSetLtFoll, as DPB slot indices.
    pub fn lt_foll(&self) -> &[Option<usize>] {
        self.lt_foll.refs()
    }

    pub fn poc_st_curr_before(&self) -> &[i32] {
        self.st_curr_before.pocs()
    }

    pub fn poc_st_curr_after(&self) -> &[i32] {
        self.st_curr_after.pocs()
    }

    pub fn poc_lt_curr(&self) -> &[i32] {
        self.lt_curr.pocs()
    }

    pub fn poc_st_foll(&self) -> &[i32] {
        self.st_foll.pocs()
    }

    pub fn poc_lt_foll(&self) -> &[i32] {
        self.lt_foll.pocs()
    }

    pub fn num_poc_total_curr(&self) -> usize {
        self.num_poc_total_curr
    }

    pub fn num_delta_pocs_of_ref_rps_idx(&self) -> usize {
        self.num_delta_pocs_of_ref_rps_idx
    }

    /// The Foll entries that did not resolve to a picture of the DPB.
    pub fn missing_foll_refs(&self) -> Vec<MissingRef> {
        let missing = |list: FollList, rps_list: &RpsList| {
            rps_list
                .refs()
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_none())
                .map(|(position, _)| MissingRef {
                    list,
                    position,
                    poc: rps_list.poc[position],
                })
                .collect::<Vec<_>>()
        };

        let mut refs = missing(FollList::ShortTerm, &self.st_foll);
        refs.extend(missing(FollList::LongTerm, &self.lt_foll));
        refs
    }

    /// Points a previously missing Foll entry to the DPB slot `index`.
    pub fn set_foll_ref(&mut self, missing: &MissingRef, index: usize) {
        let list = match missing.list {
            FollList::ShortTerm => &mut self.st_foll,
            FollList::LongTerm => &mut self.lt_foll,
        };

        if missing.position < list.num {
            list.refs[missing.position] = Some(index);
        }
    }
}
