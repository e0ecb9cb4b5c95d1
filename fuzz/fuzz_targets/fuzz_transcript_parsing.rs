#![no_main]

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use libfuzzer_sys::fuzz_target;

use clawwatch::transcript::{parse_transcript, read_transcript_from, TASK_MAX_CHARS};

fuzz_target!(|data: &[u8]| {
    let Ok(plain) = parse_transcript(data) else {
        return;
    };
    if let Some(task) = &plain.task {
        assert!(task.chars().count() <= TASK_MAX_CHARS);
    }

    // Gzip framing must not change what the parser sees.
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    if encoder.write_all(data).is_err() {
        return;
    }
    let Ok(compressed) = encoder.finish() else {
        return;
    };
    let decoded = read_transcript_from(flate2::read::GzDecoder::new(compressed.as_slice()))
        .expect("gzip round trip of a parseable transcript");
    assert_eq!(decoded.entries, plain.entries);
    assert_eq!(decoded.metrics.size_bytes, data.len() as u64);
});
