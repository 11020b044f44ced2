// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsed H.265 syntax consumed by the DPB.
//!
//! Bit-level parsing of parameter sets and slice headers is done by an
//! external parser. These types only carry the syntax elements (and derived
//! CamelCase variables) that picture order count, reference picture set and
//! DPB management depend on. Field names follow the syntax element names of
//! ITU-T H.265.

use log::error;

use crate::codec::h265::nalu::NaluHeader;
use crate::Resolution;

/// Size of the largest picture the DPB budget is computed for, in luma
/// samples. Table A.8, level 6.2.
pub const MAX_LUMA_PS: u32 = 8_912_896;
/// `Sqrt(MaxLumaPs * 8)`, the largest allowed width or height. See A.4.1.
pub const SQRT_MAX_LUMA_PS_X8: u32 = 8444;
/// maxDpbPicBuf, see A.4.2.
pub const MAX_DPB_PIC_BUF: usize = 6;

/// Upper bound on the number of pictures in the DPB.
pub const MAX_DPB_SIZE: usize = 16;

/// Derives MaxDpbSize from the size of the pictures in the CVS. See A.4.2.
///
/// Smaller pictures let more of them fit in the same amount of memory, so
/// the capacity grows from `MAX_DPB_PIC_BUF` up to `MAX_DPB_SIZE` as the
/// picture size shrinks.
pub fn max_dpb_size(resolution: Resolution) -> usize {
    if resolution.width > SQRT_MAX_LUMA_PS_X8 || resolution.height > SQRT_MAX_LUMA_PS_X8 {
        error!(
            "Picture size {}x{} is out of bounds",
            resolution.width, resolution.height
        );
    }

    let pic_size_in_samples_y = u64::from(resolution.width) * u64::from(resolution.height);
    let max_luma_ps = u64::from(MAX_LUMA_PS);

    let max_dpb_size = if pic_size_in_samples_y <= max_luma_ps >> 2 {
        4 * MAX_DPB_PIC_BUF
    } else if pic_size_in_samples_y <= max_luma_ps >> 1 {
        2 * MAX_DPB_PIC_BUF
    } else if pic_size_in_samples_y <= (3 * max_luma_ps) >> 2 {
        (4 * MAX_DPB_PIC_BUF) / 3
    } else {
        MAX_DPB_PIC_BUF
    };

    std::cmp::min(max_dpb_size, MAX_DPB_SIZE)
}

/// A candidate short-term reference picture set, after the inter RPS
/// prediction of 7.4.8 has been resolved by the parser.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShortTermRefPicSet {
    /// When set, specifies that this RPS is predicted from another candidate
    /// RPS.
    pub inter_ref_pic_set_prediction_flag: bool,
    /// delta_idx_minus1 plus 1 specifies the difference between the index of
    /// this RPS and the index of the source candidate RPS. Only signaled for
    /// the RPS in the slice header.
    pub delta_idx_minus1: u8,
    /// Same as DeltaPocS0 in ITU-T H.265, one entry per negative
    /// picture.
    pub delta_poc_s0: Vec<i32>,
    /// Same as UsedByCurrPicS0 in ITU-T H.265.
    pub used_by_curr_pic_s0: Vec<bool>,
    /// Same as DeltaPocS1 in ITU-T H.265, one entry per positive
    /// picture.
    pub delta_poc_s1: Vec<i32>,
    /// Same as UsedByCurrPicS1 in ITU-T H.265.
    pub used_by_curr_pic_s1: Vec<bool>,
}

impl ShortTermRefPicSet {
    /// Builds a set without inter prediction from `(DeltaPocS0,
    /// UsedByCurrPicS0)` and `(DeltaPocS1, UsedByCurrPicS1)` pairs.
    pub fn new(negative: &[(i32, bool)], positive: &[(i32, bool)]) -> Self {
        Self {
            delta_poc_s0: negative.iter().map(|e| e.0).collect(),
            used_by_curr_pic_s0: negative.iter().map(|e| e.1).collect(),
            delta_poc_s1: positive.iter().map(|e| e.0).collect(),
            used_by_curr_pic_s1: positive.iter().map(|e| e.1).collect(),
            ..Default::default()
        }
    }

    pub fn num_negative_pics(&self) -> usize {
        self.delta_poc_s0.len()
    }

    pub fn num_positive_pics(&self) -> usize {
        self.delta_poc_s1.len()
    }

    /// Same as NumDeltaPocs in ITU-T H.265.
    pub fn num_delta_pocs(&self) -> usize {
        self.num_negative_pics() + self.num_positive_pics()
    }
}

/// The sequence parameter set fields the DPB needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sps {
    pub seq_parameter_set_id: u8,
    pub chroma_format_idc: u8,
    pub pic_width_in_luma_samples: u16,
    pub pic_height_in_luma_samples: u16,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    /// Specifies MaxPicOrderCntLsb = 2 ^ (log2_max_pic_order_cnt_lsb_minus4 +
    /// 4). The value shall be in the range of 0 to 12, inclusive.
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    /// The candidate short-term RPSs, num_short_term_ref_pic_sets of them.
    pub short_term_ref_pic_sets: Vec<ShortTermRefPicSet>,
    pub long_term_ref_pics_present_flag: bool,
    /// Candidate long-term reference picture POC LSBs.
    pub lt_ref_pic_poc_lsb_sps: Vec<u32>,
    pub used_by_curr_pic_lt_sps_flag: Vec<bool>,
}

impl Default for Sps {
    fn default() -> Self {
        Self {
            seq_parameter_set_id: 0,
            chroma_format_idc: 1,
            pic_width_in_luma_samples: 0,
            pic_height_in_luma_samples: 0,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            log2_max_pic_order_cnt_lsb_minus4: 0,
            short_term_ref_pic_sets: Default::default(),
            long_term_ref_pics_present_flag: false,
            lt_ref_pic_poc_lsb_sps: Default::default(),
            used_by_curr_pic_lt_sps_flag: Default::default(),
        }
    }
}

impl Sps {
    pub fn num_short_term_ref_pic_sets(&self) -> usize {
        self.short_term_ref_pic_sets.len()
    }

    /// log2(MaxPicOrderCntLsb).
    pub fn log2_max_pic_order_cnt_lsb(&self) -> u8 {
        self.log2_max_pic_order_cnt_lsb_minus4 + 4
    }

    /// MaxPicOrderCntLsb.
    pub fn max_pic_order_cnt_lsb(&self) -> i32 {
        1 << self.log2_max_pic_order_cnt_lsb()
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.pic_width_in_luma_samples.into(),
            height: self.pic_height_in_luma_samples.into(),
        }
    }

    /// BitDepthY.
    pub fn bit_depth_luma(&self) -> u8 {
        self.bit_depth_luma_minus8 + 8
    }

    /// BitDepthC.
    pub fn bit_depth_chroma(&self) -> u8 {
        self.bit_depth_chroma_minus8 + 8
    }

    /// MaxDpbSize for this sequence. See A.4.2.
    pub fn max_dpb_size(&self) -> usize {
        max_dpb_size(self.resolution())
    }
}

/// The slice segment header fields the DPB needs. Dependent slice segments
/// are expected to carry a copy of their independent slice's values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceHeader {
    /// When set, specifies that the slice segment is the first slice segment
    /// of the picture in decoding order.
    pub first_slice_segment_in_pic_flag: bool,
    /// Affects the output of previously-decoded pictures in the DPB after the
    /// decoding of an IDR or a BLA picture.
    pub no_output_of_prior_pics_flag: bool,
    pub pic_output_flag: bool,
    /// Specifies the picture order count modulo MaxPicOrderCntLsb.
    pub pic_order_cnt_lsb: u16,
    /// When set, the RPS of the picture is one of the SPS candidates, selected
    /// by `short_term_ref_pic_set_idx`. Otherwise it is
    /// `short_term_ref_pic_set`.
    pub short_term_ref_pic_set_sps_flag: bool,
    pub short_term_ref_pic_set_idx: u8,
    /// The RPS signaled in the slice header, when
    /// `short_term_ref_pic_set_sps_flag` is not set.
    pub short_term_ref_pic_set: ShortTermRefPicSet,
    /// Number of long-term entries taken from the SPS candidates.
    pub num_long_term_sps: u8,
    /// Number of long-term entries signaled in the slice header.
    pub num_long_term_pics: u8,
    /// SPS candidate index of each of the `num_long_term_sps` first entries.
    pub lt_idx_sps: Vec<u8>,
    /// PocLsbLt of the `num_long_term_pics` slice-signaled entries.
    pub poc_lsb_lt: Vec<u32>,
    /// UsedByCurrPicLt of the `num_long_term_pics` slice-signaled entries.
    pub used_by_curr_pic_lt_flag: Vec<bool>,
    /// One flag per long-term entry, SPS and slice entries alike.
    pub delta_poc_msb_present_flag: Vec<bool>,
    /// Same as DeltaPocMsbCycleLt in ITU-T H.265 (7-52), i.e. already
    /// accumulated, one per long-term entry.
    pub delta_poc_msb_cycle_lt: Vec<u32>,
    /// Size in bits of the short-term RPS in the slice header.
    pub st_rps_bits: u32,
    /// Size in bits of the long-term entries in the slice header.
    pub lt_rps_bits: u32,
}

impl Default for SliceHeader {
    fn default() -> Self {
        Self {
            first_slice_segment_in_pic_flag: true,
            no_output_of_prior_pics_flag: false,
            pic_output_flag: true,
            pic_order_cnt_lsb: 0,
            short_term_ref_pic_set_sps_flag: false,
            short_term_ref_pic_set_idx: 0,
            short_term_ref_pic_set: Default::default(),
            num_long_term_sps: 0,
            num_long_term_pics: 0,
            lt_idx_sps: Default::default(),
            poc_lsb_lt: Default::default(),
            used_by_curr_pic_lt_flag: Default::default(),
            delta_poc_msb_present_flag: Default::default(),
            delta_poc_msb_cycle_lt: Default::default(),
            st_rps_bits: 0,
            lt_rps_bits: 0,
        }
    }
}

impl SliceHeader {
    /// Same as CurrRpsIdx in ITU-T H.265.
    pub fn curr_rps_idx(&self, sps: &Sps) -> usize {
        if self.short_term_ref_pic_set_sps_flag {
            usize::from(self.short_term_ref_pic_set_idx)
        } else {
            sps.num_short_term_ref_pic_sets()
        }
    }

    /// Total number of long-term entries.
    pub fn num_long_term(&self) -> usize {
        usize::from(self.num_long_term_sps) + usize::from(self.num_long_term_pics)
    }
}

/// A slice segment, as handed over by the external parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slice<'a> {
    pub nalu: NaluHeader,
    pub header: SliceHeader,
    /// The slice segment NAL unit bytes, passed through to the backend.
    pub data: &'a [u8],
}

impl<'a> Slice<'a> {
    pub fn new(nalu: NaluHeader, header: SliceHeader, data: &'a [u8]) -> Self {
        Self {
            nalu,
            header,
            data,
        }
    }

    pub fn header(&self) -> &SliceHeader {
        &self.header
    }

    pub fn nalu(&self) -> &NaluHeader {
        &self.nalu
    }
}
