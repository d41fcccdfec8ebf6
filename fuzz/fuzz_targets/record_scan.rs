#![no_main]

use libfuzzer_sys::fuzz_target;
use seawall_core::format::{decode_deltas, decode_record, RecordHeader, SegmentHeader};

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes through the decode paths replay depends on.
    // Everything here must reject malformed input gracefully:
    // - truncated or zeroed headers
    // - bad magic, versions and CRC32 checksums
    // - delta counts and extent tables that overrun their regions
    let _ = SegmentHeader::decode(data);

    if let Ok(header) = RecordHeader::decode(data) {
        let _ = header.sanity_check(4096, 1 << 30);
        // treat the tail of the input as the record's regions
        let split = (header.mdlength as usize).min(data.len());
        let (md, rest) = data.split_at(split);
        let _ = header.verify(md, rest, header.segment_nonce);
        let _ = decode_deltas(&header, md);
        let _ = decode_record(&header, md, rest, 4096);
    }
});
