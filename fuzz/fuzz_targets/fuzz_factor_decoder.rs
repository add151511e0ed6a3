#![no_main]
use libfuzzer_sys::arbitrary::{self, Arbitrary};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    nlcs: u8,
    mask: u8,
    reply: &'a [u8],
}

fuzz_target!(|input: Input<'_>| {
    // Device replies are untrusted: decoding must never panic, and anything
    // accepted must have the requested shape.
    let nlcs = usize::from(input.nlcs % 5);
    if let Some(factors) = runrilla_core::factors::decode_factors(input.reply, nlcs) {
        assert_eq!(factors.len(), nlcs);
        assert!(factors.iter().all(|f| f.is_finite()));
    }
    if let Some(raw) = runrilla_core::protocol::parse_raw_channels(
        input.reply,
        b"01A\r",
        b"A",
        input.mask,
        nlcs,
    ) {
        assert!(raw.len() <= 4);
    }
});
