// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stateless decoders.
//!
//! Stateless here refers to the backend API targeted by these decoders. The decoders themselves do
//! hold the decoding state so the backend doesn't need to.
//!
//! The [`StatelessDecoder`] struct is the basis of all stateless decoders. It is created by
//! combining a codec to a [backend](crate::backend), after which parsed bitstream units can be
//! submitted through the [`StatelessVideoDecoder::decode`] method.

pub mod h265;

use thiserror::Error;

use crate::codec::h265::dpb::DpbError;
use crate::decoder::BlockingMode;
use crate::decoder::DecodedHandle;
use crate::decoder::DecodedPicture;
use crate::decoder::DecoderEvent;
use crate::decoder::ReadyFramesQueue;

/// Error returned by stateless backend methods.
#[derive(Error, Debug)]
pub enum StatelessBackendError {
    #[error("not enough resources to proceed with the operation now")]
    OutOfResources,
    #[error("operation not supported by the backend")]
    Unsupported,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type returned by stateless backend methods.
pub type StatelessBackendResult<T> = Result<T, StatelessBackendError>;

/// Decoder implementations can use this struct to represent their decoding state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum DecodingState {
    /// Decoder is currently decoding input.
    #[default]
    Decoding,
    /// Decoder has been flushed, and can resume with the current parameters after
    /// seeing a random access point.
    Reset,
}

/// Error returned by the [`StatelessVideoDecoder::decode`] method.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The stream needs more pictures than the DPB can hold. The decoder must
    /// be reset before it can be used again.
    #[error("DPB overflow, max_dpb_size is {max_dpb_size}")]
    DpbOverflow { max_dpb_size: usize },
    /// An internal DPB invariant has been violated.
    #[error("DPB invariant violated: {0}")]
    DpbInvariant(DpbError),
    #[error("no active SPS")]
    NoActiveSps,
    #[error(transparent)]
    DecoderError(#[from] anyhow::Error),
    #[error(transparent)]
    BackendError(#[from] StatelessBackendError),
}

impl From<DpbError> for DecodeError {
    fn from(err: DpbError) -> Self {
        match err {
            DpbError::Overflow { max_dpb_size } => Self::DpbOverflow { max_dpb_size },
            err => {
                log::error!("{}", err);
                Self::DpbInvariant(err)
            }
        }
    }
}

/// Specifies the type of picture that a backend will create for a given codec.
///
/// The picture type is state that is preserved from the start of a given frame to its submission
/// to the backend. Some codecs don't need it, in this case they can just set `Picture` to `()`.
pub trait StatelessDecoderBackendPicture<Codec: StatelessCodec> {
    /// Backend-specific type representing a frame being decoded. Useful for decoders that need
    /// to render a frame in several steps and to preserve its state in between.
    ///
    /// Backends that don't use this can simply set it to `()`.
    type Picture;
}

/// Common trait shared by all stateless video decoder backends, providing codec-independent
/// methods.
pub trait StatelessDecoderBackend {
    /// The type that the backend returns as a result of a decode operation.
    /// This will usually be some backend-specific type with a resource and a
    /// resource pool so that said buffer can be reused for another decode
    /// operation when it goes out of scope.
    type Handle: DecodedHandle + Clone;
}

/// Stateless video decoder interface.
///
/// Input is processed one parsed unit at a time, in decoding order. Decoded pictures become
/// available through [`next_event`] as soon as their last slice has been submitted.
///
/// [`next_event`]: StatelessVideoDecoder::next_event
pub trait StatelessVideoDecoder {
    /// Parsed bitstream unit accepted by the decoder.
    type Input<'a>;
    /// Handle to the decoded pictures.
    type Handle;

    /// Processes `input`, which belongs to the access unit presented at `timestamp`.
    fn decode(&mut self, timestamp: u64, input: Self::Input<'_>) -> Result<(), DecodeError>;

    /// Flush the decoder i.e. finish processing all pending decode requests and make sure the
    /// resulting frames are ready to be retrieved via [`next_event`].
    ///
    /// Note that after flushing, a random access point must be submitted before decoding can
    /// resume.
    ///
    /// [`next_event`]: StatelessVideoDecoder::next_event
    fn flush(&mut self) -> Result<(), DecodeError>;

    /// Returns the next event, if there is any pending.
    fn next_event(&mut self) -> Option<DecoderEvent<Self::Handle>>;
}

pub trait StatelessCodec {
    /// State that needs to be kept during a decoding operation, typed by backend.
    type DecoderState<B: StatelessDecoderBackend + StatelessDecoderBackendPicture<Self>>;
}

/// A struct that serves as a basis to implement a stateless decoder.
///
/// A stateless decoder is defined by two generic parameters:
///
/// * A codec, represented by a type that implements [`StatelessCodec`]. This type defines the
/// codec-specific decoder state and other codec properties.
/// * A backend, i.e. an interface to talk to the hardware that accelerates decoding.
///
/// So for instance, a H.265 decoder using the dummy backend has the following type:
///
/// ```text
/// let decoder: StatelessDecoder<H265, dummy::Backend>;
/// ```
///
/// This struct just manages the high-level decoder state as well as the queue of decoded frames.
/// All the rest is left to codec-specific code.
pub struct StatelessDecoder<C, B>
where
    C: StatelessCodec,
    B: StatelessDecoderBackend + StatelessDecoderBackendPicture<C>,
{
    /// Whether the decoder should block on decode operations.
    blocking_mode: BlockingMode,

    ready_queue: ReadyFramesQueue<DecodedPicture<B::Handle>>,

    decoding_state: DecodingState,

    /// The backend used for hardware acceleration.
    backend: B,

    /// Codec-specific state.
    codec: C::DecoderState<B>,
}

impl<C, B> StatelessDecoder<C, B>
where
    C: StatelessCodec,
    B: StatelessDecoderBackend + StatelessDecoderBackendPicture<C>,
    C::DecoderState<B>: Default,
{
    pub fn new(backend: B, blocking_mode: BlockingMode) -> Self {
        Self {
            backend,
            blocking_mode,
            decoding_state: Default::default(),
            ready_queue: Default::default(),
            codec: Default::default(),
        }
    }
}

impl<C, B> StatelessDecoder<C, B>
where
    C: StatelessCodec,
    B: StatelessDecoderBackend + StatelessDecoderBackendPicture<C>,
{
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn blocking_mode(&self) -> BlockingMode {
        self.blocking_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpb_errors() {
        let err = DecodeError::from(DpbError::Overflow { max_dpb_size: 6 });
        assert!(matches!(err, DecodeError::DpbOverflow { max_dpb_size: 6 }));

        // Anything but an overflow is a bug in the decoder, not in the stream.
        let err = DecodeError::from(DpbError::FullnessUnderflow);
        assert!(matches!(err, DecodeError::DpbInvariant(DpbError::FullnessUnderflow)));

        let err = DecodeError::from(DpbError::InvalidSlot(3));
        assert!(matches!(err, DecodeError::DpbInvariant(DpbError::InvalidSlot(3))));
    }
}
