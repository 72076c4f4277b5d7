#![no_main]

use dagspawn_graph::GraphDescriptor;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(g) = GraphDescriptor::decode_with_limit(data, 600 * 1024) else {
        return;
    };

    let again = GraphDescriptor::decode(data).expect("decoding is deterministic");
    assert_eq!(g, again);

    // Anything accepted re-encodes to a buffer that decodes to the same graph.
    let canonical = g.encode();
    let back = GraphDescriptor::decode(&canonical).expect("canonical form decodes");
    assert_eq!(g, back);

    let _ = g.validate(0);
});
