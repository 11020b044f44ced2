// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy backend whose only purpose is to let the decoder
//! run so we can test it in isolation.
//!
//! The backend does not decode anything. It keeps a record of what it has
//! been asked to do, and can be told to fail in order to exercise the error
//! paths of the decoder.

use std::cell::RefCell;
use std::rc::Rc;

use crate::decoder::stateless::StatelessBackendResult;
use crate::decoder::stateless::StatelessDecoderBackend;
use crate::decoder::DecodedHandle;

/// What the backend saw of a picture.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PictureRecord {
    pub pic_order_cnt_val: i32,
    pub target_slot: usize,
    /// NoOutputOfPriorPicsFlag as inferred by the decoder.
    pub no_output_of_prior_pics_flag: bool,
    /// DPB slots referenced by the picture, in RPS order.
    pub references: Vec<usize>,
    /// Number of references the picture uses that are not in the DPB.
    pub missing_references: usize,
    pub num_slices: usize,
}

/// Picture being decoded.
#[derive(Debug, Default)]
pub struct BackendPicture {
    pub timestamp: u64,
    pub record: PictureRecord,
}

#[derive(Debug, Default)]
pub struct BackendHandle {
    pub timestamp: u64,
    pub pic_order_cnt_val: i32,
    /// Whether this picture has been generated in place of a missing
    /// reference.
    pub unavailable: bool,
    /// Sample data, only filled for generated pictures.
    pub samples: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct Handle {
    pub handle: Rc<RefCell<BackendHandle>>,
}

impl Handle {
    pub fn new(handle: BackendHandle) -> Self {
        Self {
            handle: Rc::new(RefCell::new(handle)),
        }
    }
}

impl DecodedHandle for Handle {
    fn timestamp(&self) -> u64 {
        self.handle.borrow().timestamp
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn sync(&self) -> StatelessBackendResult<()> {
        Ok(())
    }
}

/// Dummy backend that can be used for any codec.
#[derive(Debug)]
pub struct Backend {
    /// Number of times a new sequence has been started.
    pub num_sequences: usize,
    /// Every picture submitted so far, in decoding order.
    pub pictures: Vec<PictureRecord>,
    /// POCs of the pictures generated for missing references.
    pub unavailable_pictures: Vec<i32>,
    /// When set, every slice decode operation fails.
    pub fail_decode_slice: bool,
    /// When unset, requests to generate missing references are rejected as
    /// unsupported.
    pub generate_unavailable: bool,
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            num_sequences: 0,
            pictures: Vec::new(),
            unavailable_pictures: Vec::new(),
            fail_decode_slice: false,
            generate_unavailable: true,
        }
    }
}

impl Backend {
    pub fn new() -> Self {
        Default::default()
    }
}

impl StatelessDecoderBackend for Backend {
    type Handle = Handle;
}
