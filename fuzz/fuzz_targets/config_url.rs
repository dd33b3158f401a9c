#![no_main]

use libfuzzer_sys::fuzz_target;
use rdb_client::Config;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = Config::from_url(s) {
            // decoded sizes must survive validation without panicking
            let _ = config.validate();
        }
    }
});
