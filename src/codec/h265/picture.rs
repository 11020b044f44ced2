// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::codec::h265::nalu::NaluType;
use crate::codec::h265::poc::PocState;
use crate::codec::h265::syntax::Slice;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Reference {
    /// "unused for reference".
    #[default]
    None,
    ShortTerm,
    LongTerm,
}

/// The class of a picture, as far as random access is concerned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PictureClass {
    Idr,
    Bla,
    Cra,
    /// Reserved IRAP types 22 and 23.
    ReservedIrap,
    Rasl,
    Radl,
    /// Trailing, TSA and STSA pictures, plus the reserved non-IRAP VCL types.
    Trailing,
    /// Not a picture.
    NonVcl,
}

impl From<NaluType> for PictureClass {
    fn from(nalu_type: NaluType) -> Self {
        match nalu_type {
            NaluType::IdrWRadl | NaluType::IdrNLp => Self::Idr,
            NaluType::BlaWLp | NaluType::BlaWRadl | NaluType::BlaNLp => Self::Bla,
            NaluType::CraNut => Self::Cra,
            NaluType::RsvIrapVcl22 | NaluType::RsvIrapVcl23 => Self::ReservedIrap,
            NaluType::RaslN | NaluType::RaslR => Self::Rasl,
            NaluType::RadlN | NaluType::RadlR => Self::Radl,
            NaluType::TrailN
            | NaluType::TrailR
            | NaluType::TsaN
            | NaluType::TsaR
            | NaluType::StsaN
            | NaluType::StsaR
            | NaluType::RsvVclN10
            | NaluType::RsvVclR11
            | NaluType::RsvVclN12
            | NaluType::RsvVclR13
            | NaluType::RsvVclN14
            | NaluType::RsvVclR15
            | NaluType::RsvVcl24
            | NaluType::RsvVcl25
            | NaluType::RsvVcl26
            | NaluType::RsvVcl27
            | NaluType::RsvVcl28
            | NaluType::RsvVcl29
            | NaluType::RsvVcl30
            | NaluType::RsvVcl31 => Self::Trailing,
            NaluType::VpsNut
            | NaluType::SpsNut
            | NaluType::PpsNut
            | NaluType::AudNut
            | NaluType::EosNut
            | NaluType::EobNut
            | NaluType::FdNut
            | NaluType::PrefixSeiNut
            | NaluType::SuffixSeiNut
            | NaluType::RsvNvcl41
            | NaluType::RsvNvcl42
            | NaluType::RsvNvcl43
            | NaluType::RsvNvcl44
            | NaluType::RsvNvcl45
            | NaluType::RsvNvcl46
            | NaluType::RsvNvcl47
            | NaluType::Unspec48
            | NaluType::Unspec49
            | NaluType::Unspec50
            | NaluType::Unspec51
            | NaluType::Unspec52
            | NaluType::Unspec53
            | NaluType::Unspec54
            | NaluType::Unspec55
            | NaluType::Unspec56
            | NaluType::Unspec57
            | NaluType::Unspec58
            | NaluType::Unspec59
            | NaluType::Unspec60
            | NaluType::Unspec61
            | NaluType::Unspec62
            | NaluType::Unspec63 => Self::NonVcl,
        }
    }
}

/// The random access flags of a picture. See 8.1.3.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RapFlags {
    /// Same as IdrPicFlag in ITU-T H.265.
    pub idr_flag: bool,
    /// Same as IrapPicFlag in ITU-T H.265.
    pub rap_flag: bool,
    pub no_rasl_output_flag: bool,
}

impl PictureClass {
    /// Derives the random access flags of a picture of this class.
    ///
    /// NoRaslOutputFlag is set for IDR and BLA pictures and for the first
    /// picture of the bitstream or after an end of sequence. Other pictures
    /// take it from HandleCraAsBlaFlag, which can only be set by external
    /// means.
    pub fn rap_flags(self, is_first_picture: bool, handle_cra_as_bla_flag: bool) -> RapFlags {
        let (idr_flag, rap_flag) = match self {
            Self::Idr => (true, true),
            Self::Bla | Self::Cra | Self::ReservedIrap => (false, true),
            Self::Rasl | Self::Radl | Self::Trailing | Self::NonVcl => (false, false),
        };

        let no_rasl_output_flag = match self {
            Self::Idr | Self::Bla => true,
            _ if is_first_picture => true,
            _ => handle_cra_as_bla_flag,
        };

        RapFlags {
            idr_flag,
            rap_flag,
            no_rasl_output_flag,
        }
    }
}

/// Data associated with an h.265 picture. Most fields are extracted from the
/// slice header and kept for future processing.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct PictureData {
    // Fields extracted from the slice header. These are the CamelCase
    // variables, unless noted otherwise.
    pub nalu_type: NaluType,
    pub idr_flag: bool,
    pub rap_flag: bool,
    pub no_rasl_output_flag: bool,
    pub no_output_of_prior_pics_flag: bool,
    pub pic_output_flag: bool,
    pub temporal_id: u8,
    pub slice_pic_order_cnt_lsb: i32,
    pub pic_order_cnt_msb: i32,
    pub pic_order_cnt_val: i32,

    // Internal state.
    /// The DPB slot the picture is decoded into. Set when the slot is
    /// allocated.
    pub target_slot: Option<usize>,
    pub short_term_ref_pic_set_size_bits: u32,
    pub long_term_ref_pic_set_size_bits: u32,
}

impl PictureData {
    /// Instantiates a new `PictureData` from a slice.
    ///
    /// See 8.1.3 Decoding process for a coded picture with nuh_layer_id equal
    /// to 0.
    ///
    /// This will also call the picture order count process (clause 8.3.1) to
    /// correctly initialize the POC values. The output and prior pictures
    /// flags are decided later, when the DPB is updated.
    pub fn new_from_slice(
        slice: &Slice,
        is_first_picture: bool,
        handle_cra_as_bla_flag: bool,
        poc_state: &mut PocState,
        log2_max_pic_order_cnt_lsb: u8,
    ) -> Self {
        let hdr = slice.header();
        let nalu_type = slice.nalu().type_();
        let temporal_id = slice.nalu().nuh_temporal_id();

        let RapFlags {
            idr_flag,
            rap_flag,
            no_rasl_output_flag,
        } = PictureClass::from(nalu_type).rap_flags(is_first_picture, handle_cra_as_bla_flag);

        let slice_pic_order_cnt_lsb = i32::from(hdr.pic_order_cnt_lsb);
        let (pic_order_cnt_msb, pic_order_cnt_val) = poc_state.decode(
            slice_pic_order_cnt_lsb,
            log2_max_pic_order_cnt_lsb,
            idr_flag,
            rap_flag,
            no_rasl_output_flag,
            temporal_id,
        );

        Self {
            nalu_type,
            idr_flag,
            rap_flag,
            no_rasl_output_flag,
            no_output_of_prior_pics_flag: false,
            pic_output_flag: hdr.pic_output_flag,
            temporal_id,
            slice_pic_order_cnt_lsb,
            pic_order_cnt_msb,
            pic_order_cnt_val,
            target_slot: None,
            short_term_ref_pic_set_size_bits: hdr.st_rps_bits,
            long_term_ref_pic_set_size_bits: hdr.lt_rps_bits,
        }
    }

    pub fn is_irap(&self) -> bool {
        self.rap_flag
    }
}
