#![no_main]

use common::chunks::{assemble, split, BinaryRecord};
use libfuzzer_sys::fuzz_target;

const MAX_LEN: usize = 1048576;

fuzz_target!(|records: Vec<BinaryRecord>| {
    let Ok(bytes) = assemble(&records, MAX_LEN) else {
        // Over the limit
        return;
    };

    let split_records = split(&bytes, MAX_LEN).unwrap();
    assert_eq!(records, split_records);
});
