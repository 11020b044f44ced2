// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Generation of unavailable reference pictures. See 8.3.3.

use anyhow::anyhow;

use crate::codec::h265::picture::Reference;
use crate::codec::h265::syntax::Sps;
use crate::decoded_frame_size;
use crate::DecodedFormat;
use crate::Resolution;

/// A reference picture that is named by the RPS of a BLA or CRA picture but
/// was never decoded, and must be generated in its place.
///
/// The generated picture has every luma sample set to `1 << (BitDepthY - 1)`
/// and every chroma sample set to `1 << (BitDepthC - 1)`. See 8.3.3.2.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnavailablePicture {
    /// PicOrderCntVal of the generated picture.
    pub pic_order_cnt_val: i32,
    /// slice_pic_order_cnt_lsb of the generated picture.
    pub slice_pic_order_cnt_lsb: i32,
    pub resolution: Resolution,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub chroma_format_idc: u8,
    /// How the generated picture is marked once in the DPB.
    pub reference: Reference,
}

impl UnavailablePicture {
    pub fn new(sps: &Sps, pic_order_cnt_val: i32, reference: Reference) -> Self {
        Self {
            pic_order_cnt_val,
            slice_pic_order_cnt_lsb: pic_order_cnt_val & (sps.max_pic_order_cnt_lsb() - 1),
            resolution: sps.resolution(),
            bit_depth_luma: sps.bit_depth_luma(),
            bit_depth_chroma: sps.bit_depth_chroma(),
            chroma_format_idc: sps.chroma_format_idc,
            reference,
        }
    }

    pub fn luma_sample_value(&self) -> u16 {
        1 << (self.bit_depth_luma - 1)
    }

    pub fn chroma_sample_value(&self) -> u16 {
        1 << (self.bit_depth_chroma - 1)
    }

    /// Fills `dst` with the picture in NV12 format. Only 8-bit 4:2:0 pictures
    /// can be represented that way.
    pub fn fill_nv12(&self, dst: &mut [u8]) -> anyhow::Result<()> {
        if self.bit_depth_luma != 8 || self.bit_depth_chroma != 8 || self.chroma_format_idc != 1 {
            return Err(anyhow!(
                "{}-bit luma, {}-bit chroma, chroma_format_idc {} is not NV12",
                self.bit_depth_luma,
                self.bit_depth_chroma,
                self.chroma_format_idc
            ));
        }

        let width = self.resolution.width as usize;
        let height = self.resolution.height as usize;
        let size = decoded_frame_size(DecodedFormat::NV12, width, height);
        if dst.len() < size {
            return Err(anyhow!(
                "buffer of {} bytes is too small for a {}x{} NV12 picture",
                dst.len(),
                width,
                height
            ));
        }

        let (luma, chroma) = dst[..size].split_at_mut(width * height);
        // Both values are 128 at 8 bits.
        luma.fill(self.luma_sample_value() as u8);
        chroma.fill(self.chroma_sample_value() as u8);

        Ok(())
    }
}
