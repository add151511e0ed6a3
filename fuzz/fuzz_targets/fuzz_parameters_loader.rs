#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parameter files are hand-edited; parse and validate must reject bad
    // input gracefully.
    if let Ok(p) = runrilla_config::load_json(data) {
        let _ = p.validate();
        let _ = p.nlcs();
    }
    if let Ok(p) = runrilla_config::load_toml(data) {
        let _ = p.validate();
    }
});
