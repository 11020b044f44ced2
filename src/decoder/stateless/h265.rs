// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod dummy;

use anyhow::Context;
use log::debug;
use log::warn;

use crate::codec::h265::dpb::Dpb;
use crate::codec::h265::nalu::NaluType;
use crate::codec::h265::picture::PictureClass;
use crate::codec::h265::picture::PictureData;
use crate::codec::h265::poc::PocState;
use crate::codec::h265::rps::RefPicSet;
use crate::codec::h265::syntax::Slice;
use crate::codec::h265::syntax::Sps;
use crate::codec::h265::unavailable::UnavailablePicture;
use crate::decoder::stateless::DecodeError;
use crate::decoder::stateless::DecodingState;
use crate::decoder::stateless::StatelessBackendError;
use crate::decoder::stateless::StatelessBackendResult;
use crate::decoder::stateless::StatelessCodec;
use crate::decoder::stateless::StatelessDecoder;
use crate::decoder::stateless::StatelessDecoderBackend;
use crate::decoder::stateless::StatelessDecoderBackendPicture;
use crate::decoder::stateless::StatelessVideoDecoder;
use crate::decoder::BlockingMode;
use crate::decoder::DecodedHandle;
use crate::decoder::DecodedPicture;
use crate::decoder::DecoderEvent;
use crate::Resolution;

/// Stateless backend methods specific to H.265.
pub trait StatelessH265DecoderBackend:
    StatelessDecoderBackend + StatelessDecoderBackendPicture<H265>
{
    /// Called when a new SPS is activated.
    fn new_sequence(&mut self, sps: &Sps) -> StatelessBackendResult<()>;

    /// Called when the decoder determines that a new picture was found. The
    /// DPB slot the picture will be decoded into is `picture.target_slot`.
    fn new_picture(
        &mut self,
        picture: &PictureData,
        timestamp: u64,
    ) -> StatelessBackendResult<Self::Picture>;

    /// Called by the decoder once per picture, before its first slice.
    fn begin_picture(
        &mut self,
        picture: &mut Self::Picture,
        picture_data: &PictureData,
        sps: &Sps,
        dpb: &Dpb<Self::Handle>,
        rps: &RefPicSet,
    ) -> StatelessBackendResult<()>;

    /// Called to dispatch a decode operation to the backend.
    fn decode_slice(
        &mut self,
        picture: &mut Self::Picture,
        slice: &Slice,
        sps: &Sps,
        dpb: &Dpb<Self::Handle>,
        rps: &RefPicSet,
    ) -> StatelessBackendResult<()>;

    /// Called when the decoder wants the backend to finish the decoding
    /// operations for `picture`. At this point, `decode_slice` has been called
    /// for all slices.
    fn submit_picture(&mut self, picture: Self::Picture) -> StatelessBackendResult<Self::Handle>;

    /// Called to generate a reference picture that is not present in the
    /// bitstream. Backends that cannot do it return
    /// [`StatelessBackendError::Unsupported`], in which case decoding goes on
    /// without the reference.
    fn new_unavailable_picture(
        &mut self,
        picture: &UnavailablePicture,
    ) -> StatelessBackendResult<Self::Handle>;
}

/// A unit of H.265 bitstream, as delivered by the parser.
#[derive(Clone, Copy, Debug)]
pub enum ParsedNalu<'a> {
    Sps(&'a Sps),
    Slice(&'a Slice<'a>),
    EndOfSequence,
    EndOfBitstream,
    /// Any other NAL unit. These do not affect the DPB.
    Other(NaluType),
}

/// Keeps track of the last values seen, to detect a new sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct SequenceInfo {
    coded_resolution: Resolution,
    bit_depth_luma_minus8: u8,
    bit_depth_chroma_minus8: u8,
    chroma_format_idc: u8,
    max_dpb_size: usize,
}

impl From<&Sps> for SequenceInfo {
    fn from(sps: &Sps) -> Self {
        SequenceInfo {
            coded_resolution: sps.resolution(),
            bit_depth_luma_minus8: sps.bit_depth_luma_minus8,
            bit_depth_chroma_minus8: sps.bit_depth_chroma_minus8,
            chroma_format_idc: sps.chroma_format_idc,
            max_dpb_size: sps.max_dpb_size(),
        }
    }
}

/// State of the picture being currently decoded.
///
/// Stored between calls to `handle_slice` that belong to the same picture.
struct CurrentPicState<B: StatelessDecoderBackendPicture<H265>> {
    /// Data for the current picture as extracted from the stream.
    pic: PictureData,
    /// Backend-specific data for that picture.
    backend_pic: B::Picture,
    timestamp: u64,
}

pub struct H265DecoderState<B: StatelessDecoderBackend + StatelessDecoderBackendPicture<H265>> {
    /// The active SPS.
    sps: Option<Sps>,
    /// Parameters of the current sequence.
    sequence_info: Option<SequenceInfo>,

    /// The decoded picture buffer.
    dpb: Dpb<B::Handle>,
    /// prevPicOrderCntLsb and prevPicOrderCntMsb.
    poc_state: PocState,
    /// The RPS of the last picture. Its Foll lists are completed with the
    /// generated pictures, if any.
    rps: RefPicSet,

    /// Whether the next picture is the first in the bitstream, or the first
    /// following an end of sequence.
    is_first_picture: bool,
    /// Same as HandleCraAsBlaFlag in ITU-T H.265. Only set by external
    /// means.
    handle_cra_as_bla_flag: bool,
    /// The value of NoRaslOutputFlag for the last IRAP picture.
    irap_no_rasl_output_flag: bool,

    /// The picture currently being decoded. We need to preserve it between
    /// calls to `decode` because multiple slices will be processed in different
    /// calls to `decode`.
    current_pic: Option<CurrentPicState<B>>,
}

impl<B> Default for H265DecoderState<B>
where
    B: StatelessDecoderBackend + StatelessDecoderBackendPicture<H265>,
{
    fn default() -> Self {
        H265DecoderState {
            sps: Default::default(),
            sequence_info: Default::default(),
            dpb: Default::default(),
            poc_state: Default::default(),
            rps: Default::default(),
            is_first_picture: true,
            handle_cra_as_bla_flag: false,
            irap_no_rasl_output_flag: false,
            current_pic: Default::default(),
        }
    }
}

/// [`StatelessCodec`] structure to use in order to create a H.265 stateless decoder.
///
/// # Accepted input
///
/// A decoder using this codec processes exactly one [`ParsedNalu`] per call to
/// [`StatelessDecoder::decode`]. A picture is complete, and emitted, once the first slice of the
/// next picture, an end of sequence or an end of bitstream is received, or when the decoder is
/// flushed.
pub struct H265;

impl StatelessCodec for H265 {
    type DecoderState<B: StatelessDecoderBackend + StatelessDecoderBackendPicture<Self>> =
        H265DecoderState<B>;
}

impl<B> StatelessDecoder<H265, B>
where
    B: StatelessH265DecoderBackend,
{
    /// Sets HandleCraAsBlaFlag, i.e. whether CRA pictures are to be handled as
    /// BLA pictures. This is typically done when seeking to a CRA picture.
    pub fn set_handle_cra_as_bla(&mut self, handle_cra_as_bla: bool) {
        self.codec.handle_cra_as_bla_flag = handle_cra_as_bla;
    }

    /// Drops all the decoding state. This is required after a DPB overflow.
    pub fn reset(&mut self) {
        debug!("Resetting the decoder");

        let handle_cra_as_bla_flag = self.codec.handle_cra_as_bla_flag;
        self.codec = Default::default();
        self.codec.handle_cra_as_bla_flag = handle_cra_as_bla_flag;
        self.ready_queue.clear();
        self.decoding_state = DecodingState::Decoding;
    }

    pub fn dpb(&self) -> &Dpb<B::Handle> {
        &self.codec.dpb
    }

    /// The RPS of the last picture.
    pub fn rps(&self) -> &RefPicSet {
        &self.codec.rps
    }

    /// Apply the parameters of `sps` to the decoder.
    fn activate_sps(&mut self, sps: &Sps) -> Result<(), DecodeError> {
        let sequence_info = SequenceInfo::from(sps);

        if self.codec.sequence_info.as_ref() != Some(&sequence_info) {
            debug!("New sequence: {:?}", sequence_info);

            // Make sure all the frames we decoded so far are in the ready queue.
            self.drain()?;
            self.codec.dpb.clear();
            self.codec.dpb.set_max_dpb_size(sequence_info.max_dpb_size);
            self.backend.new_sequence(sps)?;
            self.codec.sequence_info = Some(sequence_info);
        }

        self.codec.sps = Some(sps.clone());

        Ok(())
    }

    /// Drain the decoder, processing all pending frames.
    fn drain(&mut self) -> Result<(), DecodeError> {
        debug!("Draining the decoder");

        // Finish the current picture if there is one pending.
        if let Some(cur_pic) = self.codec.current_pic.take() {
            self.finish_picture(cur_pic)?;
        }

        Ok(())
    }

    // See C.3.2
    fn update_dpb_before_decoding(
        &mut self,
        pic: &mut PictureData,
        is_first_picture: bool,
        no_output_of_prior_pics_flag: bool,
    ) -> Result<(), DecodeError> {
        if pic.rap_flag && pic.no_rasl_output_flag {
            // A CRA picture is handled as if no_output_of_prior_pics_flag
            // was set, regardless of the signaled value.
            pic.no_output_of_prior_pics_flag =
                pic.nalu_type.is_cra() || is_first_picture || no_output_of_prior_pics_flag;

            if pic.no_output_of_prior_pics_flag {
                self.codec.dpb.clear();
            }
        }

        let removed = self.codec.dpb.remove_unused()?;
        debug!(
            "Removed {} pictures before decoding POC {}, DPB fullness is {}",
            removed,
            pic.pic_order_cnt_val,
            self.codec.dpb.fullness()
        );

        Ok(())
    }

    // See 8.3.3
    fn generate_unavailable_reference_pictures(&mut self) -> Result<(), DecodeError> {
        for missing in self.codec.rps.missing_foll_refs() {
            // Always keep a slot for the current picture.
            if self.codec.dpb.num_free_slots() <= 1 {
                warn!(
                    "No room left to generate reference picture POC {}",
                    missing.poc
                );
                break;
            }

            let sps = self.codec.sps.as_ref().ok_or(DecodeError::NoActiveSps)?;
            let unavailable = UnavailablePicture::new(sps, missing.poc, missing.reference());

            let handle = match self.backend.new_unavailable_picture(&unavailable) {
                Ok(handle) => handle,
                Err(StatelessBackendError::Unsupported) => {
                    warn!(
                        "Backend cannot generate reference picture POC {}, it will be missing",
                        missing.poc
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Failed to generate reference picture POC {}: {}",
                        missing.poc, e
                    );
                    continue;
                }
            };

            let index = self.codec.dpb.allocate()?;
            self.codec.dpb.set_reference(index, unavailable.reference)?;
            self.codec.dpb.store_picture(
                index,
                unavailable.pic_order_cnt_val,
                unavailable.slice_pic_order_cnt_lsb,
                handle,
            )?;
            self.codec.rps.set_foll_ref(&missing, index);

            debug!(
                "Generated {:?} reference picture POC {} in slot {}",
                unavailable.reference, unavailable.pic_order_cnt_val, index
            );
        }

        Ok(())
    }

    /// Called once per picture to start it.
    fn begin_picture(
        &mut self,
        timestamp: u64,
        slice: &Slice,
    ) -> Result<CurrentPicState<B>, DecodeError> {
        let is_first_picture = self.codec.is_first_picture;
        let sps = self.codec.sps.as_ref().ok_or(DecodeError::NoActiveSps)?;

        // Only committed once the picture is known to be decodable.
        let mut poc_state = self.codec.poc_state;
        let mut pic = PictureData::new_from_slice(
            slice,
            is_first_picture,
            self.codec.handle_cra_as_bla_flag,
            &mut poc_state,
            sps.log2_max_pic_order_cnt_lsb(),
        );

        debug!(
            "Decode picture POC {} ({:?})",
            pic.pic_order_cnt_val, pic.nalu_type
        );

        self.codec.rps = RefPicSet::derive(&mut self.codec.dpb, &pic, sps, slice.header())
            .context("While deriving the reference picture set")?;

        self.codec.poc_state = poc_state;
        self.codec.is_first_picture = false;

        if pic.is_irap() {
            self.codec.irap_no_rasl_output_flag = pic.no_rasl_output_flag;
        }

        self.update_dpb_before_decoding(
            &mut pic,
            is_first_picture,
            slice.header().no_output_of_prior_pics_flag,
        )?;

        let class = PictureClass::from(pic.nalu_type);
        if class == PictureClass::Bla || (class == PictureClass::Cra && pic.no_rasl_output_flag) {
            self.generate_unavailable_reference_pictures()?;
        }

        // See C.3.4
        let target_slot = self.codec.dpb.allocate()?;
        pic.target_slot = Some(target_slot);

        // 8.1.3: RASL pictures associated with an IRAP picture with
        // NoRaslOutputFlag are not output and may not be correctly decodable.
        if pic.nalu_type.is_rasl()
            && (pic.no_rasl_output_flag || self.codec.irap_no_rasl_output_flag)
        {
            pic.pic_output_flag = false;
        }

        debug!(
            "POC {} goes to slot {}, PicOutputFlag is {}",
            pic.pic_order_cnt_val, target_slot, pic.pic_output_flag
        );

        let backend_pic = match self.start_backend_picture(&pic, timestamp) {
            Ok(backend_pic) => backend_pic,
            Err(e) => {
                self.abort_picture(&pic)?;
                return Err(e);
            }
        };

        Ok(CurrentPicState {
            pic,
            backend_pic,
            timestamp,
        })
    }

    fn start_backend_picture(
        &mut self,
        pic: &PictureData,
        timestamp: u64,
    ) -> Result<B::Picture, DecodeError> {
        let sps = self.codec.sps.as_ref().ok_or(DecodeError::NoActiveSps)?;

        let mut backend_pic = self.backend.new_picture(pic, timestamp)?;
        self.backend.begin_picture(
            &mut backend_pic,
            pic,
            sps,
            &self.codec.dpb,
            &self.codec.rps,
        )?;

        Ok(backend_pic)
    }

    /// Gives the slot of a picture that failed to decode back to the DPB.
    fn abort_picture(&mut self, pic: &PictureData) -> Result<(), DecodeError> {
        if let Some(target_slot) = pic.target_slot {
            warn!(
                "Dropping POC {}, releasing slot {}",
                pic.pic_order_cnt_val, target_slot
            );
            self.codec.dpb.release(target_slot)?;
        }

        Ok(())
    }

    /// Handle a slice. Called once per slice NALU.
    fn handle_slice(
        &mut self,
        mut cur_pic: CurrentPicState<B>,
        slice: &Slice,
    ) -> Result<(), DecodeError> {
        let sps = self.codec.sps.as_ref().ok_or(DecodeError::NoActiveSps)?;

        let result = self.backend.decode_slice(
            &mut cur_pic.backend_pic,
            slice,
            sps,
            &self.codec.dpb,
            &self.codec.rps,
        );

        match result {
            Ok(()) => {
                self.codec.current_pic = Some(cur_pic);
                Ok(())
            }
            Err(e) => {
                self.abort_picture(&cur_pic.pic)?;
                Err(e.into())
            }
        }
    }

    fn finish_picture(&mut self, cur_pic: CurrentPicState<B>) -> Result<(), DecodeError> {
        let CurrentPicState {
            pic,
            backend_pic,
            timestamp,
        } = cur_pic;

        debug!("Finishing picture POC {}", pic.pic_order_cnt_val);

        let target_slot = pic.target_slot.context("Picture has no target slot")?;

        let handle = match self.submit_picture(backend_pic) {
            Ok(handle) => handle,
            Err(e) => {
                self.abort_picture(&pic)?;
                return Err(e);
            }
        };

        self.codec.dpb.store_picture(
            target_slot,
            pic.pic_order_cnt_val,
            pic.slice_pic_order_cnt_lsb,
            handle.clone(),
        )?;
        self.codec
            .dpb
            .set_needed_for_output(target_slot, pic.pic_output_flag)?;

        self.output_picture(target_slot, &pic, handle, timestamp)
    }

    /// Sends the picture in `slot` to the ready queue. Pictures are output in
    /// decoding order, so they are never kept in the DPB for output.
    fn output_picture(
        &mut self,
        slot: usize,
        pic: &PictureData,
        handle: B::Handle,
        timestamp: u64,
    ) -> Result<(), DecodeError> {
        debug!(
            "Adding POC {} to the ready queue, PicOutputFlag is {}",
            pic.pic_order_cnt_val, pic.pic_output_flag
        );

        self.ready_queue.push(DecodedPicture {
            handle,
            pic_order_cnt_val: pic.pic_order_cnt_val,
            slot,
            output_flag: pic.pic_output_flag,
            timestamp,
        });
        self.codec.dpb.set_needed_for_output(slot, false)?;

        Ok(())
    }

    fn process_slice(&mut self, timestamp: u64, slice: &Slice) -> Result<(), DecodeError> {
        let nalu = slice.nalu();

        if nalu.layer_id() > 0 {
            debug!("Ignoring slice with nuh_layer_id {}", nalu.layer_id());
            return Ok(());
        }

        if !nalu.type_().is_vcl_picture() {
            debug!("Ignoring slice of reserved type {:?}", nalu.type_());
            return Ok(());
        }

        if self.decoding_state == DecodingState::Reset {
            // In the Reset state we can resume decoding from any IRAP picture.
            if !nalu.type_().is_irap() {
                debug!("Skipping {:?} slice after a flush", nalu.type_());
                return Ok(());
            }

            self.decoding_state = DecodingState::Decoding;
        }

        let cur_pic = match self.codec.current_pic.take() {
            // No current picture, start a new one.
            None => self.begin_picture(timestamp, slice)?,
            Some(cur_pic) if slice.header().first_slice_segment_in_pic_flag => {
                self.finish_picture(cur_pic)?;
                self.begin_picture(timestamp, slice)?
            }
            Some(cur_pic) => cur_pic,
        };

        self.handle_slice(cur_pic, slice)
    }

    /// Submits the picture to the accelerator.
    fn submit_picture(&mut self, backend_pic: B::Picture) -> Result<B::Handle, DecodeError> {
        let handle = self.backend.submit_picture(backend_pic)?;

        if self.blocking_mode == BlockingMode::Blocking {
            handle.sync()?;
        }

        Ok(handle)
    }
}

impl<B> StatelessVideoDecoder for StatelessDecoder<H265, B>
where
    B: StatelessH265DecoderBackend,
{
    type Input<'a> = ParsedNalu<'a>;
    type Handle = B::Handle;

    fn decode(&mut self, timestamp: u64, nalu: ParsedNalu<'_>) -> Result<(), DecodeError> {
        match nalu {
            ParsedNalu::Sps(sps) => self.activate_sps(sps),
            ParsedNalu::Slice(slice) => self.process_slice(timestamp, slice),
            ParsedNalu::EndOfSequence | ParsedNalu::EndOfBitstream => {
                self.drain()?;
                self.codec.is_first_picture = true;
                Ok(())
            }
            ParsedNalu::Other(nalu_type) => {
                debug!("Ignoring NAL unit {:?}", nalu_type);
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> Result<(), DecodeError> {
        self.drain()?;
        self.codec.is_first_picture = true;
        self.decoding_state = DecodingState::Reset;

        Ok(())
    }

    fn next_event(&mut self) -> Option<DecoderEvent<B::Handle>> {
        (&mut self.ready_queue).next().map(DecoderEvent::FrameReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::Backend;
    use crate::backend::dummy::Handle;
    use crate::codec::h265::nalu::NaluHeader;
    use crate::codec::h265::picture::Reference;
    use crate::codec::h265::syntax::ShortTermRefPicSet;
    use crate::codec::h265::syntax::SliceHeader;

    type Decoder = StatelessDecoder<H265, Backend>;

    fn sps(width: u16, height: u16, log2_max_pic_order_cnt_lsb_minus4: u8) -> Sps {
        Sps {
            pic_width_in_luma_samples: width,
            pic_height_in_luma_samples: height,
            log2_max_pic_order_cnt_lsb_minus4,
            ..Default::default()
        }
    }

    fn slice(
        nalu_type: NaluType,
        pic_order_cnt_lsb: u16,
        negative: &[(i32, bool)],
    ) -> Slice<'static> {
        Slice::new(
            NaluHeader::new(nalu_type, 0),
            SliceHeader {
                pic_order_cnt_lsb,
                short_term_ref_pic_set: ShortTermRefPicSet::new(negative, &[]),
                ..Default::default()
            },
            &[],
        )
    }

    fn decoder_with(sps: &Sps) -> Decoder {
        let _ = env_logger::try_init();

        let mut decoder = Decoder::new_dummy(BlockingMode::Blocking);
        decoder.decode(0, ParsedNalu::Sps(sps)).unwrap();
        decoder
    }

    fn decode_slice(
        decoder: &mut Decoder,
        timestamp: u64,
        slice: &Slice,
    ) -> Result<(), DecodeError> {
        decoder.decode(timestamp, ParsedNalu::Slice(slice))
    }

    fn frames(decoder: &mut Decoder) -> Vec<DecodedPicture<Handle>> {
        std::iter::from_fn(|| decoder.next_event())
            .map(|event| match event {
                DecoderEvent::FrameReady(picture) => picture,
            })
            .collect()
    }

    #[test]
    fn idr_and_three_trailing_pictures() {
        let mut decoder = decoder_with(&sps(1920, 1080, 4));
        assert_eq!(decoder.dpb().max_dpb_size(), 16);

        let stream = [
            slice(NaluType::IdrNLp, 0, &[]),
            slice(NaluType::TrailR, 1, &[(-1, true)]),
            slice(NaluType::TrailR, 2, &[(-1, true), (-2, false)]),
            slice(NaluType::TrailR, 3, &[(-1, true), (-3, false)]),
        ];

        for (timestamp, slice) in stream.iter().enumerate() {
            decode_slice(&mut decoder, timestamp as u64, slice).unwrap();
        }
        decoder.decode(0, ParsedNalu::EndOfSequence).unwrap();

        let frames = frames(&mut decoder);
        let pocs = frames.iter().map(|f| f.pic_order_cnt_val).collect::<Vec<_>>();
        assert_eq!(pocs, vec![0, 1, 2, 3]);
        assert!(frames.iter().all(|f| f.output_flag));
        assert_eq!(
            frames.iter().map(|f| f.timestamp).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        // POC 1 is not referenced by POC 3, so its slot is reused.
        assert_eq!(
            frames.iter().map(|f| f.slot).collect::<Vec<_>>(),
            vec![0, 1, 2, 1]
        );

        let references = decoder
            .backend()
            .pictures
            .iter()
            .map(|p| p.references.clone())
            .collect::<Vec<_>>();
        assert_eq!(references, vec![vec![], vec![0], vec![1], vec![2]]);

        let dpb = decoder.dpb();
        assert_eq!(dpb.fullness(), 3);
        assert_eq!(dpb.slot(0).unwrap().pic_order_cnt_val, 0);
        assert!(dpb.slot(0).unwrap().is_ref());
        assert_eq!(dpb.slot(1).unwrap().pic_order_cnt_val, 3);
        assert_eq!(dpb.slot(2).unwrap().pic_order_cnt_val, 2);
        assert!(dpb.slots().iter().all(|s| !s.needed_for_output));
    }

    #[test]
    fn idr_empties_the_dpb() {
        let mut decoder = decoder_with(&sps(1920, 1080, 4));

        decode_slice(&mut decoder, 0, &slice(NaluType::IdrWRadl, 0, &[])).unwrap();
        for poc in 1..5 {
            let refs = [(-1, true), (-2, false)];
            decode_slice(&mut decoder, 0, &slice(NaluType::TrailR, poc, &refs)).unwrap();
        }
        decode_slice(&mut decoder, 0, &slice(NaluType::IdrNLp, 0, &[])).unwrap();

        let dpb = decoder.dpb();
        // Only the IDR picture being decoded is left.
        assert_eq!(dpb.fullness(), 1);
        assert!(dpb.slot(0).unwrap().is_occupied());
        assert!(dpb.slots().iter().skip(1).all(|s| s.is_free()));
        assert_eq!(frames(&mut decoder).len(), 5);
    }

    #[test]
    fn fullness_stays_within_bounds() {
        let mut decoder = decoder_with(&sps(1920, 1080, 0));
        let mut state = 0x853c_49e6_748f_ea9bu64;
        let mut random = move |max: u64| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 33) % max
        };

        let mut poc = 0;
        let mut decoded = 0;
        for i in 0..400 {
            let slice = if i % 40 == 0 {
                poc = 0;
                slice(NaluType::IdrWRadl, 0, &[])
            } else {
                poc += 1;
                let mut deltas = Vec::new();
                for _ in 0..random(6) {
                    let delta = -(random(poc.min(8) as u64) as i32) - 1;
                    if !deltas.iter().any(|(d, _)| *d == delta) {
                        deltas.push((delta, random(2) == 0));
                    }
                }
                deltas.sort_by(|a, b| b.0.cmp(&a.0));
                slice(NaluType::TrailR, (poc % 16) as u16, &deltas)
            };

            decode_slice(&mut decoder, i, &slice).unwrap();

            let dpb = decoder.dpb();
            assert!(dpb.fullness() <= dpb.max_dpb_size());
            assert_eq!(
                dpb.fullness(),
                dpb.slots().iter().filter(|s| s.is_occupied()).count()
            );

            for frame in frames(&mut decoder) {
                assert_eq!(frame.timestamp, decoded);
                decoded += 1;
            }
        }

        decoder.flush().unwrap();
        decoded += frames(&mut decoder).len() as u64;
        assert_eq!(decoded, 400);
    }

    #[test]
    fn poc_wraps_across_pictures() {
        let mut decoder = decoder_with(&sps(64, 64, 0));

        decode_slice(&mut decoder, 0, &slice(NaluType::IdrNLp, 0, &[])).unwrap();
        for poc in 1..40u16 {
            decode_slice(&mut decoder, 0, &slice(NaluType::TrailR, poc % 16, &[(-1, true)]))
                .unwrap();
        }
        decoder.flush().unwrap();

        let pocs = frames(&mut decoder)
            .iter()
            .map(|f| f.pic_order_cnt_val)
            .collect::<Vec<_>>();
        assert_eq!(pocs, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn missing_reference_is_not_fatal() {
        let mut decoder = decoder_with(&sps(64, 64, 4));

        decode_slice(&mut decoder, 0, &slice(NaluType::IdrNLp, 0, &[])).unwrap();
        decode_slice(&mut decoder, 1, &slice(NaluType::TrailR, 2, &[(-1, true), (-2, true)]))
            .unwrap();

        assert_eq!(decoder.rps().st_curr_before(), &[None, Some(0)]);
        decoder.flush().unwrap();

        let record = &decoder.backend().pictures[1];
        assert_eq!(record.references, vec![0]);
        assert_eq!(record.missing_references, 1);
        assert_eq!(frames(&mut decoder).len(), 2);
    }

    #[test]
    fn long_term_reference_is_eventually_released() {
        let mut decoder = decoder_with(&sps(64, 64, 4));

        decode_slice(&mut decoder, 0, &slice(NaluType::IdrNLp, 0, &[])).unwrap();

        // POC 1 keeps POC 0 as a long-term reference.
        let mut long_term = slice(NaluType::TrailR, 1, &[]);
        long_term.header.num_long_term_pics = 1;
        long_term.header.poc_lsb_lt = vec![0];
        long_term.header.used_by_curr_pic_lt_flag = vec![true];
        decode_slice(&mut decoder, 1, &long_term).unwrap();
        assert_eq!(decoder.dpb().slot(0).unwrap().reference, Reference::LongTerm);

        // POC 2 does not name POC 0 anymore, so POC 0 is removed and POC 2
        // takes its slot.
        decode_slice(&mut decoder, 2, &slice(NaluType::TrailR, 2, &[(-1, true)])).unwrap();
        assert_eq!(decoder.dpb().fullness(), 2);
        assert_eq!(decoder.dpb().slot(0).unwrap().reference, Reference::ShortTerm);

        decoder.flush().unwrap();
        let slots = frames(&mut decoder)
            .iter()
            .map(|f| (f.pic_order_cnt_val, f.slot))
            .collect::<Vec<_>>();
        assert_eq!(slots, vec![(0, 0), (1, 1), (2, 0)]);
    }

    #[test]
    fn rasl_pictures_are_not_output_after_random_access() {
        let mut decoder = decoder_with(&sps(64, 64, 4));

        let mut rasl = slice(NaluType::RaslN, 6, &[(-2, true)]);
        rasl.header.short_term_ref_pic_set = ShortTermRefPicSet::new(&[(-2, true)], &[(2, true)]);
        let mut radl = slice(NaluType::RadlN, 7, &[]);
        radl.header.short_term_ref_pic_set = ShortTermRefPicSet::new(&[], &[(1, true)]);

        let stream = [
            slice(NaluType::CraNut, 8, &[]),
            rasl,
            radl,
            slice(NaluType::TrailR, 9, &[(-1, true)]),
        ];
        for slice in stream.iter() {
            decode_slice(&mut decoder, 0, slice).unwrap();
        }
        decoder.flush().unwrap();

        let frames = frames(&mut decoder);
        assert_eq!(
            frames.iter().map(|f| f.pic_order_cnt_val).collect::<Vec<_>>(),
            vec![8, 6, 7, 9]
        );
        assert_eq!(
            frames.iter().map(|f| f.output_flag).collect::<Vec<_>>(),
            vec![true, false, true, true]
        );
        assert_eq!(decoder.backend().pictures[1].missing_references, 1);
    }

    #[test]
    fn rasl_pictures_are_output_after_mid_stream_cra() {
        let mut decoder = decoder_with(&sps(64, 64, 4));

        let mut rasl = slice(NaluType::RaslR, 6, &[]);
        rasl.header.short_term_ref_pic_set = ShortTermRefPicSet::new(&[(-2, true)], &[(2, true)]);

        let stream = [
            slice(NaluType::IdrNLp, 0, &[]),
            slice(NaluType::TrailR, 4, &[(-4, true)]),
            // POC 4 is kept for the leading pictures.
            slice(NaluType::CraNut, 8, &[(-4, false)]),
            rasl,
            slice(NaluType::TrailR, 9, &[(-1, true)]),
        ];
        for (timestamp, slice) in stream.iter().enumerate() {
            decode_slice(&mut decoder, timestamp as u64, slice).unwrap();
        }
        decoder.flush().unwrap();

        let frames = frames(&mut decoder)
            .iter()
            .map(|f| (f.pic_order_cnt_val, f.output_flag))
            .collect::<Vec<_>>();
        assert_eq!(frames, vec![(0, true), (4, true), (8, true), (6, true), (9, true)]);

        let rasl = &decoder.backend().pictures[3];
        assert_eq!(rasl.pic_order_cnt_val, 6);
        assert_eq!(rasl.references, vec![1, 0]);
        assert_eq!(rasl.missing_references, 0);
        assert!(decoder.backend().unavailable_pictures.is_empty());
    }

    #[test]
    fn no_output_of_prior_pics_flag() {
        let mut decoder = decoder_with(&sps(64, 64, 4));

        let mut flushing_idr = slice(NaluType::IdrWRadl, 0, &[]);
        flushing_idr.header.no_output_of_prior_pics_flag = true;

        let stream = [
            slice(NaluType::IdrNLp, 0, &[]),
            slice(NaluType::TrailR, 1, &[(-1, true)]),
            slice(NaluType::TrailR, 2, &[(-1, true), (-2, true)]),
            flushing_idr,
        ];
        for (timestamp, slice) in stream.iter().enumerate() {
            decode_slice(&mut decoder, timestamp as u64, slice).unwrap();
        }
        assert_eq!(decoder.dpb().fullness(), 1);

        decode_slice(&mut decoder, 4, &slice(NaluType::IdrNLp, 0, &[])).unwrap();
        assert_eq!(decoder.dpb().fullness(), 1);
        decoder.flush().unwrap();

        // The first picture always has the flag inferred.
        let flags = decoder
            .backend()
            .pictures
            .iter()
            .map(|p| p.no_output_of_prior_pics_flag)
            .collect::<Vec<_>>();
        assert_eq!(flags, vec![true, false, false, true, false]);
        assert_eq!(frames(&mut decoder).len(), 5);
    }

    #[test]
    fn malformed_first_picture_keeps_random_access_state() {
        let mut decoder = decoder_with(&sps(64, 64, 4));

        let mut bad = slice(NaluType::CraNut, 8, &[]);
        bad.header.num_long_term_sps = 1;
        bad.header.lt_idx_sps = vec![5];
        let err = decode_slice(&mut decoder, 0, &bad);
        assert!(matches!(err, Err(DecodeError::DecoderError(_))));
        assert_eq!(decoder.dpb().fullness(), 0);

        // The next CRA is still the first picture, so its missing leading
        // references are generated.
        decode_slice(&mut decoder, 1, &slice(NaluType::CraNut, 8, &[(-4, false)])).unwrap();
        assert_eq!(decoder.backend().unavailable_pictures, vec![4]);
        decoder.flush().unwrap();

        let frames = frames(&mut decoder);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pic_order_cnt_val, 8);
        assert_eq!(frames[0].timestamp, 1);
    }

    #[test]
    fn pic_output_flag_is_honored() {
        let mut decoder = decoder_with(&sps(64, 64, 4));

        let mut hidden = slice(NaluType::TrailR, 1, &[(-1, true)]);
        hidden.header.pic_output_flag = false;

        decode_slice(&mut decoder, 0, &slice(NaluType::IdrNLp, 0, &[])).unwrap();
        decode_slice(&mut decoder, 1, &hidden).unwrap();
        decoder.flush().unwrap();

        let flags = frames(&mut decoder)
            .iter()
            .map(|f| f.output_flag)
            .collect::<Vec<_>>();
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn end_of_sequence() {
        let mut decoder = decoder_with(&sps(64, 64, 4));

        decode_slice(&mut decoder, 0, &slice(NaluType::IdrNLp, 0, &[])).unwrap();
        decode_slice(&mut decoder, 1, &slice(NaluType::TrailR, 1, &[(-1, true)])).unwrap();
        decoder.decode(0, ParsedNalu::EndOfSequence).unwrap();
        assert_eq!(frames(&mut decoder).len(), 2);

        // The CRA following the end of sequence starts over: its POC MSB is
        // zero and the pictures before it are flushed.
        decode_slice(&mut decoder, 2, &slice(NaluType::CraNut, 5, &[])).unwrap();
        assert_eq!(decoder.dpb().fullness(), 1);

        let rasl = slice(NaluType::RaslR, 3, &[(-1, true)]);
        decode_slice(&mut decoder, 3, &rasl).unwrap();
        decoder.decode(0, ParsedNalu::EndOfBitstream).unwrap();

        let frames = frames(&mut decoder);
        assert_eq!(frames[0].pic_order_cnt_val, 5);
        assert_eq!(frames[0].slot, 0);
        assert!(frames[0].output_flag);
        assert_eq!(frames[1].pic_order_cnt_val, 3);
        assert!(!frames[1].output_flag);
    }

    #[test]
    fn backend_failure_releases_the_slot() {
        let mut decoder = decoder_with(&sps(64, 64, 4));

        decode_slice(&mut decoder, 0, &slice(NaluType::IdrNLp, 0, &[])).unwrap();

        decoder.backend_mut().fail_decode_slice = true;
        let err = decode_slice(&mut decoder, 1, &slice(NaluType::TrailR, 1, &[(-1, true)]));
        assert!(matches!(err, Err(DecodeError::BackendError(_))));
        assert_eq!(decoder.dpb().fullness(), 1);

        decoder.backend_mut().fail_decode_slice = false;
        decode_slice(&mut decoder, 2, &slice(NaluType::TrailR, 2, &[(-2, true)])).unwrap();
        decoder.flush().unwrap();

        let frames = frames(&mut decoder);
        assert_eq!(
            frames.iter().map(|f| (f.pic_order_cnt_val, f.slot)).collect::<Vec<_>>(),
            vec![(0, 0), (2, 1)]
        );
    }

    #[test]
    fn bla_generates_missing_references() {
        let mut decoder = decoder_with(&sps(64, 64, 0));

        let mut bla = slice(NaluType::BlaWLp, 8, &[(-2, false), (-4, false)]);
        bla.header.num_long_term_pics = 1;
        bla.header.poc_lsb_lt = vec![1];
        bla.header.used_by_curr_pic_lt_flag = vec![false];
        decode_slice(&mut decoder, 0, &bla).unwrap();

        assert_eq!(decoder.backend().unavailable_pictures, vec![6, 4, 1]);
        assert_eq!(decoder.rps().st_foll(), &[Some(0), Some(1)]);
        assert_eq!(decoder.rps().lt_foll(), &[Some(2)]);

        let dpb = decoder.dpb();
        assert_eq!(dpb.fullness(), 4);
        assert_eq!(dpb.slot(0).unwrap().reference, Reference::ShortTerm);
        assert_eq!(dpb.slot(0).unwrap().pic_order_cnt_val, 6);
        assert_eq!(dpb.slot(2).unwrap().reference, Reference::LongTerm);
        assert_eq!(dpb.slot(2).unwrap().slice_pic_order_cnt_lsb, 1);
        assert!(dpb.slots().iter().take(3).all(|s| !s.needed_for_output));

        let handle = dpb.slot(0).unwrap().handle.clone().unwrap();
        assert!(handle.handle.borrow().unavailable);
        assert!(handle.handle.borrow().samples.iter().all(|&s| s == 128));

        let mut trailing = slice(NaluType::TrailR, 9, &[(-1, true), (-3, true)]);
        trailing.header.num_long_term_pics = 1;
        trailing.header.poc_lsb_lt = vec![1];
        trailing.header.used_by_curr_pic_lt_flag = vec![true];
        decode_slice(&mut decoder, 1, &trailing).unwrap();
        decoder.flush().unwrap();

        let record = &decoder.backend().pictures[1];
        assert_eq!(record.references, vec![3, 0, 2]);
        assert_eq!(record.missing_references, 0);

        // Generated pictures are never output.
        let pocs = frames(&mut decoder)
            .iter()
            .map(|f| f.pic_order_cnt_val)
            .collect::<Vec<_>>();
        assert_eq!(pocs, vec![8, 9]);
    }

    #[test]
    fn missing_references_without_backend_support() {
        let mut decoder = decoder_with(&sps(64, 64, 0));
        decoder.backend_mut().generate_unavailable = false;

        decode_slice(&mut decoder, 0, &slice(NaluType::BlaNLp, 8, &[(-2, false)])).unwrap();

        assert!(decoder.backend().unavailable_pictures.is_empty());
        assert_eq!(decoder.rps().st_foll(), &[None]);
        assert_eq!(decoder.dpb().fullness(), 1);
    }

    #[test]
    fn cra_handled_as_bla() {
        let mut decoder = decoder_with(&sps(64, 64, 4));

        decode_slice(&mut decoder, 0, &slice(NaluType::IdrNLp, 0, &[])).unwrap();
        decode_slice(&mut decoder, 1, &slice(NaluType::TrailR, 1, &[(-1, true)])).unwrap();

        decoder.set_handle_cra_as_bla(true);
        decode_slice(&mut decoder, 2, &slice(NaluType::CraNut, 20, &[(-19, false)])).unwrap();

        // The CRA starts over, POC 1 is generated rather than kept.
        assert_eq!(decoder.backend().unavailable_pictures, vec![1]);
        assert_eq!(decoder.dpb().fullness(), 2);
    }

    #[test]
    fn dpb_overflow() {
        // Big pictures only leave room for 6 of them.
        let mut decoder = decoder_with(&sps(4096, 2176, 4));
        assert_eq!(decoder.dpb().max_dpb_size(), 6);

        decode_slice(&mut decoder, 0, &slice(NaluType::IdrNLp, 0, &[])).unwrap();
        for poc in 1..6 {
            let refs = (1..=poc).map(|d| (-(d as i32), true)).collect::<Vec<_>>();
            decode_slice(&mut decoder, 0, &slice(NaluType::TrailR, poc, &refs)).unwrap();
        }

        let refs = (1..=6).map(|d| (-d, true)).collect::<Vec<_>>();
        let err = decode_slice(&mut decoder, 0, &slice(NaluType::TrailR, 6, &refs));
        assert!(matches!(err, Err(DecodeError::DpbOverflow { max_dpb_size: 6 })));
        assert_eq!(decoder.dpb().fullness(), 6);

        decoder.reset();
        assert_eq!(decoder.dpb().fullness(), 0);
        assert!(decoder.next_event().is_none());

        decoder.decode(0, ParsedNalu::Sps(&sps(4096, 2176, 4))).unwrap();
        decode_slice(&mut decoder, 0, &slice(NaluType::IdrNLp, 0, &[])).unwrap();
        assert_eq!(decoder.dpb().fullness(), 1);
    }

    #[test]
    fn new_sequence() {
        let mut decoder = decoder_with(&sps(1920, 1080, 4));
        decoder.decode(0, ParsedNalu::Sps(&sps(1920, 1080, 4))).unwrap();
        assert_eq!(decoder.backend().num_sequences, 1);

        decode_slice(&mut decoder, 0, &slice(NaluType::IdrNLp, 0, &[])).unwrap();
        decoder.decode(0, ParsedNalu::Sps(&sps(4096, 2176, 4))).unwrap();

        assert_eq!(decoder.backend().num_sequences, 2);
        assert_eq!(decoder.dpb().max_dpb_size(), 6);
        assert_eq!(decoder.dpb().fullness(), 0);
        // The pending picture has been drained.
        assert_eq!(frames(&mut decoder).len(), 1);
    }

    #[test]
    fn slices_without_sps() {
        let mut decoder = Decoder::new_dummy(BlockingMode::NonBlocking);
        let err = decode_slice(&mut decoder, 0, &slice(NaluType::IdrNLp, 0, &[]));
        assert!(matches!(err, Err(DecodeError::NoActiveSps)));
    }

    #[test]
    fn multiple_slices_per_picture() {
        let mut decoder = decoder_with(&sps(64, 64, 4));

        let first = slice(NaluType::IdrNLp, 0, &[]);
        let mut second = first.clone();
        second.header.first_slice_segment_in_pic_flag = false;

        decode_slice(&mut decoder, 0, &first).unwrap();
        decode_slice(&mut decoder, 0, &second).unwrap();
        decoder.decode(0, ParsedNalu::Other(NaluType::PrefixSeiNut)).unwrap();
        decoder.flush().unwrap();

        assert_eq!(decoder.backend().pictures.len(), 1);
        assert_eq!(decoder.backend().pictures[0].num_slices, 2);
        assert_eq!(frames(&mut decoder).len(), 1);
    }

    #[test]
    fn other_layers_are_ignored() {
        let mut decoder = decoder_with(&sps(64, 64, 4));

        let mut enhancement = slice(NaluType::IdrNLp, 0, &[]);
        enhancement.nalu.nuh_layer_id = 1;
        decode_slice(&mut decoder, 0, &enhancement).unwrap();
        decoder.flush().unwrap();

        assert!(decoder.backend().pictures.is_empty());
        assert_eq!(decoder.dpb().fullness(), 0);
    }

    #[test]
    fn flush_waits_for_random_access_point() {
        let mut decoder = decoder_with(&sps(64, 64, 4));

        decode_slice(&mut decoder, 0, &slice(NaluType::IdrNLp, 0, &[])).unwrap();
        decoder.flush().unwrap();
        assert_eq!(frames(&mut decoder).len(), 1);

        decode_slice(&mut decoder, 1, &slice(NaluType::TrailR, 1, &[(-1, true)])).unwrap();
        assert!(decoder.backend().pictures.len() == 1);

        decode_slice(&mut decoder, 2, &slice(NaluType::CraNut, 4, &[])).unwrap();
        decoder.flush().unwrap();

        let frames = frames(&mut decoder);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pic_order_cnt_val, 4);
        assert_eq!(decoder.dpb().fullness(), 1);
    }
}
