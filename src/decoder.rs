// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod stateless;

use std::collections::VecDeque;

use crate::decoder::stateless::StatelessBackendResult;

/// Events that can be retrieved using the `next_event` method of a decoder.
#[derive(Debug)]
pub enum DecoderEvent<H> {
    /// The next picture has been decoded.
    FrameReady(DecodedPicture<H>),
}

/// A picture that went through the decoder, in decoding order.
#[derive(Clone, Debug)]
pub struct DecodedPicture<H> {
    /// Backend handle holding the decoded samples.
    pub handle: H,
    pub pic_order_cnt_val: i32,
    /// DPB slot the picture has been decoded into.
    pub slot: usize,
    /// Same as PicOutputFlag in ITU-T H.265. Pictures with this flag
    /// unset are never meant to be displayed.
    pub output_flag: bool,
    pub timestamp: u64,
}

/// Instructs the decoder on whether it should block on the decode operations.
/// Nonblocking mode is conditional on backend support.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockingMode {
    #[default]
    Blocking,
    NonBlocking,
}

/// The handle type used by the stateless decoder backend. The only requirement
/// from implementors is that they give access to the underlying handle and
/// that they can be (cheaply) cloned.
pub trait DecodedHandle {
    /// Returns the timestamp of the picture.
    fn timestamp(&self) -> u64;

    /// Returns `true` if this handle has been completely decoded.
    fn is_ready(&self) -> bool;

    /// Wait until this handle has been completely rendered.
    fn sync(&self) -> StatelessBackendResult<()>;
}

/// A queue where decoded pictures wait until they are retrieved by the
/// client.
struct ReadyFramesQueue<T> {
    /// Queue of all the frames waiting to be sent to the client.
    queue: VecDeque<T>,
}

impl<T> Default for ReadyFramesQueue<T> {
    fn default() -> Self {
        Self {
            queue: Default::default(),
        }
    }
}

impl<T> ReadyFramesQueue<T> {
    /// Push `handle` to the back of the queue.
    fn push(&mut self, handle: T) {
        self.queue.push_back(handle)
    }

    fn clear(&mut self) {
        self.queue.clear()
    }
}

/// Allows us to manipulate the frames list like an iterator without consuming it.
impl<'a, T> Iterator for &'a mut ReadyFramesQueue<T> {
    type Item = T;

    /// Returns the next frame (if any) waiting to be dequeued.
    fn next(&mut self) -> Option<T> {
        self.queue.pop_front()
    }
}
