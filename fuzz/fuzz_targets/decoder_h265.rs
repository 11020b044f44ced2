#![no_main]

use hevc_dpb::codec::h265::nalu::NaluHeader;
use hevc_dpb::codec::h265::nalu::NaluType;
use hevc_dpb::codec::h265::syntax::ShortTermRefPicSet;
use hevc_dpb::codec::h265::syntax::Slice;
use hevc_dpb::codec::h265::syntax::SliceHeader;
use hevc_dpb::codec::h265::syntax::Sps;
use hevc_dpb::decoder::stateless::h265::ParsedNalu;
use hevc_dpb::decoder::stateless::h265::H265;
use hevc_dpb::decoder::stateless::DecodeError;
use hevc_dpb::decoder::stateless::StatelessDecoder;
use hevc_dpb::decoder::stateless::StatelessVideoDecoder;
use libfuzzer_sys::fuzz_target;

// Each unit is made of a NALU header followed by the POC LSB and up to three
// negative deltas, one byte each.
const UNIT_LEN: usize = 6;

fn slice_header(unit: &[u8]) -> SliceHeader {
    let negative = unit[3..]
        .iter()
        .filter(|b| **b & 0x7f != 0)
        .scan(0i32, |delta, b| {
            *delta -= i32::from(b & 0x0f) + 1;
            Some((*delta, b & 0x80 != 0))
        })
        .collect::<Vec<_>>();

    SliceHeader {
        pic_order_cnt_lsb: u16::from(unit[2]),
        no_output_of_prior_pics_flag: unit[2] & 1 != 0,
        short_term_ref_pic_set: ShortTermRefPicSet::new(&negative, &[]),
        ..Default::default()
    }
}

fuzz_target!(|data: &[u8]| {
    let sps = Sps {
        pic_width_in_luma_samples: 1920,
        pic_height_in_luma_samples: 1080,
        log2_max_pic_order_cnt_lsb_minus4: 4,
        ..Default::default()
    };

    let mut decoder = StatelessDecoder::<H265, _>::new_dummy(Default::default());
    if decoder.decode(0, ParsedNalu::Sps(&sps)).is_err() {
        return;
    }

    for (timestamp, unit) in data.chunks_exact(UNIT_LEN).enumerate() {
        let Ok(nalu) = NaluHeader::parse(unit) else {
            continue;
        };

        let result = match nalu.type_() {
            NaluType::EosNut => decoder.decode(timestamp as u64, ParsedNalu::EndOfSequence),
            NaluType::EobNut => decoder.decode(timestamp as u64, ParsedNalu::EndOfBitstream),
            type_ if type_.is_vcl_picture() => {
                let slice = Slice::new(nalu, slice_header(unit), &[]);
                decoder.decode(timestamp as u64, ParsedNalu::Slice(&slice))
            }
            type_ => decoder.decode(timestamp as u64, ParsedNalu::Other(type_)),
        };

        assert!(decoder.dpb().fullness() <= decoder.dpb().max_dpb_size());

        if let Err(DecodeError::DpbOverflow { .. }) = result {
            decoder.reset();
        }

        while decoder.next_event().is_some() {}
    }

    let _ = decoder.flush();
});
