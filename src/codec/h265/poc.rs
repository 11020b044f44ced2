// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// The picture order count state carried from one picture to the next. See
/// 8.3.1 Decoding process for picture order count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PocState {
    /// Same as prevPicOrderCntLsb in ITU-T H.265.
    pub prev_pic_order_cnt_lsb: i32,
    /// Same as prevPicOrderCntMsb in ITU-T H.265.
    pub prev_pic_order_cnt_msb: i32,
}

impl PocState {
    /// Computes PicOrderCntMsb and PicOrderCntVal for a picture whose
    /// slice_pic_order_cnt_lsb is `lsb`, returned in that order.
    ///
    /// The state is reset by IDR pictures, and only pictures in the lowest
    /// temporal sub-layer update it for the pictures that follow.
    pub fn decode(
        &mut self,
        lsb: i32,
        log2_max_pic_order_cnt_lsb: u8,
        idr_flag: bool,
        rap_flag: bool,
        no_rasl_output_flag: bool,
        temporal_id: u8,
    ) -> (i32, i32) {
        let max_pic_order_cnt_lsb = 1i32 << log2_max_pic_order_cnt_lsb;

        if idr_flag {
            *self = Default::default();
        }

        let prev_lsb = self.prev_pic_order_cnt_lsb;
        let prev_msb = self.prev_pic_order_cnt_msb;

        // Equation (8-1)
        let pic_order_cnt_msb = if rap_flag && no_rasl_output_flag {
            0
        } else if lsb < prev_lsb && (prev_lsb - lsb) >= (max_pic_order_cnt_lsb / 2) {
            prev_msb + max_pic_order_cnt_lsb
        } else if lsb > prev_lsb && (lsb - prev_lsb) > (max_pic_order_cnt_lsb / 2) {
            prev_msb - max_pic_order_cnt_lsb
        } else {
            prev_msb
        };

        // Equation (8-2)
        let pic_order_cnt_val = lsb + pic_order_cnt_msb;

        if temporal_id == 0 {
            self.prev_pic_order_cnt_lsb = lsb;
            self.prev_pic_order_cnt_msb = pic_order_cnt_msb;
        }

        log::debug!(
            "POC lsb {} msb {} -> {}",
            lsb,
            pic_order_cnt_msb,
            pic_order_cnt_val
        );

        (pic_order_cnt_msb, pic_order_cnt_val)
    }
}
