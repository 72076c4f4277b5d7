#![no_main]

use dagspawn_node::escape;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let enc = escape::encode(data);
    assert!(!enc.contains(&0));
    assert_eq!(escape::decode(&enc).expect("own encoding decodes"), data);

    if let Ok(dec) = escape::decode(data) {
        if !data.contains(&0) {
            let mut buf = data.to_vec();
            let n = escape::decode_in_place(&mut buf).expect("same input decodes in place");
            assert_eq!(&buf[..n], &dec[..]);
        }
    }
});
