#![no_main]

use std::io::Cursor;

use common::frame::Frame;
use libfuzzer_sys::fuzz_target;

const MAX_LEN: usize = 1048576;

fuzz_target!(|frame: Frame| {
    if frame.payload.len() > MAX_LEN {
        return;
    }

    let mut stream = Vec::new();
    frame.write_to(&mut stream, MAX_LEN).unwrap();

    let read = Frame::read_from(&mut Cursor::new(&stream), MAX_LEN).unwrap();
    assert_eq!(frame, read);

    // Any single flipped byte must be rejected
    for i in 0..stream.len() {
        let mut corrupt = stream.clone();
        corrupt[i] ^= 0x5a;
        assert!(Frame::read_from(&mut Cursor::new(&corrupt), MAX_LEN).is_err());
    }
});
