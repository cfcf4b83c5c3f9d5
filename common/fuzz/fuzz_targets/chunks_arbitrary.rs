#![no_main]

use common::{binary_serialize::BinarySerialize, chunks::BinaryRecord};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = common::chunks::split(data, 1048576);

    let mut cursor = std::io::Cursor::new(data);
    let _ = BinaryRecord::deserialize_from_stream(&mut cursor);
});
