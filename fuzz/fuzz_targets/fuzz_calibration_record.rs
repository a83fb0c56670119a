#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(rec) = serde_json::from_slice::<avbot_config::CalibrationRecord>(data) else {
        return;
    };
    if rec.validate().is_ok() {
        let pct = rec.to_settings_pct();
        assert!(pct.max_steer <= 100.0);
        assert!(pct.throttle_limit <= 100.0);
    }
});
