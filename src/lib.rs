// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoded picture buffer management for stateless H.265 decoders.
//!
//! The crate takes parsed parameter sets and slice headers in decoding order,
//! and for each picture derives its picture order count and reference picture
//! set, maintains the pool of decoded pictures and tells the backend which
//! slots to decode into and reference from. The actual sample decoding is
//! left to a backend implementing
//! [`StatelessH265DecoderBackend`](decoder::stateless::h265::StatelessH265DecoderBackend).

pub mod backend;
pub mod codec;
pub mod decoder;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DecodedFormat {
    NV12,
}

/// Returns the size required to store a frame of `format` with size `width`x`height`, without any
/// padding.
pub fn decoded_frame_size(format: DecodedFormat, width: usize, height: usize) -> usize {
    match format {
        DecodedFormat::NV12 => {
            let u_size = width * height;
            // U and V planes need to be aligned to 2.
            let uv_size = ((width + 1) / 2) * ((height + 1) / 2) * 2;

            u_size + uv_size
        }
    }
}
