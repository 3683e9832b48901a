//! Feeds arbitrary bytes to the native index decoder.
//!
//! Decoding must either produce a structurally consistent index or fail
//! with an error; it must never panic or allocate unboundedly.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = sentencedb::index::persistence::decode_structure(data);
});
