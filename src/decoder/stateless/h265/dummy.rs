// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy backend whose only purpose is to let the decoder
//! run so we can test it in isolation.

use anyhow::anyhow;

use crate::backend::dummy::Backend;
use crate::backend::dummy::BackendHandle;
use crate::backend::dummy::BackendPicture;
use crate::backend::dummy::Handle;
use crate::backend::dummy::PictureRecord;
use crate::codec::h265::dpb::Dpb;
use crate::codec::h265::picture::PictureData;
use crate::codec::h265::rps::RefPicSet;
use crate::codec::h265::syntax::Slice;
use crate::codec::h265::syntax::Sps;
use crate::codec::h265::unavailable::UnavailablePicture;
use crate::decoded_frame_size;
use crate::decoder::stateless::h265::StatelessH265DecoderBackend;
use crate::decoder::stateless::h265::H265;
use crate::decoder::stateless::StatelessBackendError;
use crate::decoder::stateless::StatelessBackendResult;
use crate::decoder::stateless::StatelessDecoder;
use crate::decoder::stateless::StatelessDecoderBackendPicture;
use crate::decoder::BlockingMode;
use crate::DecodedFormat;

impl StatelessDecoderBackendPicture<H265> for Backend {
    type Picture = BackendPicture;
}

impl StatelessH265DecoderBackend for Backend {
    fn new_sequence(&mut self, _: &Sps) -> StatelessBackendResult<()> {
        self.num_sequences += 1;
        Ok(())
    }

    fn new_picture(
        &mut self,
        picture: &PictureData,
        timestamp: u64,
    ) -> StatelessBackendResult<Self::Picture> {
        let target_slot = picture
            .target_slot
            .ok_or_else(|| anyhow!("picture has no target slot"))?;

        Ok(BackendPicture {
            timestamp,
            record: PictureRecord {
                pic_order_cnt_val: picture.pic_order_cnt_val,
                target_slot,
                no_output_of_prior_pics_flag: picture.no_output_of_prior_pics_flag,
                ..Default::default()
            },
        })
    }

    fn begin_picture(
        &mut self,
        picture: &mut Self::Picture,
        _: &PictureData,
        _: &Sps,
        _: &Dpb<Self::Handle>,
        rps: &RefPicSet,
    ) -> StatelessBackendResult<()> {
        let curr = rps
            .st_curr_before()
            .iter()
            .chain(rps.st_curr_after())
            .chain(rps.lt_curr());

        for reference in curr {
            match reference {
                Some(index) => picture.record.references.push(*index),
                None => picture.record.missing_references += 1,
            }
        }

        Ok(())
    }

    fn decode_slice(
        &mut self,
        picture: &mut Self::Picture,
        _: &Slice,
        _: &Sps,
        _: &Dpb<Self::Handle>,
        _: &RefPicSet,
    ) -> StatelessBackendResult<()> {
        if self.fail_decode_slice {
            return Err(anyhow!("slice decode failure requested").into());
        }

        picture.record.num_slices += 1;
        Ok(())
    }

    fn submit_picture(&mut self, picture: Self::Picture) -> StatelessBackendResult<Self::Handle> {
        let handle = Handle::new(BackendHandle {
            timestamp: picture.timestamp,
            pic_order_cnt_val: picture.record.pic_order_cnt_val,
            ..Default::default()
        });

        self.pictures.push(picture.record);
        Ok(handle)
    }

    fn new_unavailable_picture(
        &mut self,
        picture: &UnavailablePicture,
    ) -> StatelessBackendResult<Self::Handle> {
        if !self.generate_unavailable {
            return Err(StatelessBackendError::Unsupported);
        }

        let size = decoded_frame_size(
            DecodedFormat::NV12,
            picture.resolution.width as usize,
            picture.resolution.height as usize,
        );
        let mut samples = vec![0; size];
        picture.fill_nv12(&mut samples)?;

        self.unavailable_pictures.push(picture.pic_order_cnt_val);

        Ok(Handle::new(BackendHandle {
            timestamp: 0,
            pic_order_cnt_val: picture.pic_order_cnt_val,
            unavailable: true,
            samples,
        }))
    }
}

impl StatelessDecoder<H265, Backend> {
    // Creates a new instance of the decoder using the dummy backend.
    pub fn new_dummy(blocking_mode: BlockingMode) -> Self {
        Self::new(Backend::new(), blocking_mode)
    }
}
