use dagspawn_graph::{GraphDescriptor, PipeEntry, WireError};

fn le32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn le64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// One pipe owned by node 3, no spawns, no writes; laid out byte by byte.
fn handmade_buffer() -> Vec<u8> {
    let mut pipe = Vec::new();
    le32(&mut pipe, 40);
    le32(&mut pipe, 16);
    le32(&mut pipe, 24);
    le32(&mut pipe, 32);
    le64(&mut pipe, 3);
    le64(&mut pipe, 100);
    le64(&mut pipe, 101);

    let mut pipes = Vec::new();
    le32(&mut pipes, 48);
    le32(&mut pipes, 8);
    pipes.extend_from_slice(&pipe);

    let mut data = Vec::new();
    le32(&mut data, 72);
    le32(&mut data, 16);
    le32(&mut data, 20);
    le32(&mut data, 68);
    le32(&mut data, 4);
    data.extend_from_slice(&pipes);
    le32(&mut data, 4);
    data
}

#[test]
fn decodes_handmade_layout() {
    let buf = handmade_buffer();
    let g = GraphDescriptor::decode(&buf).expect("decode handmade graph");
    assert!(g.spawns().is_empty());
    assert!(g.writes().is_empty());
    assert_eq!(
        g.pipes(),
        &[PipeEntry {
            owner: 3,
            read_pipe: 100,
            write_pipe: 101,
        }]
    );
    assert_eq!(g.encode(), buf, "builder must reproduce the canonical layout");
}

#[test]
fn rejects_pipe_table_with_missing_field() {
    let mut pipe = Vec::new();
    le32(&mut pipe, 28);
    le32(&mut pipe, 12);
    le32(&mut pipe, 20);
    le64(&mut pipe, 3);
    le64(&mut pipe, 100);

    let mut pipes = Vec::new();
    le32(&mut pipes, 8 + pipe.len() as u32);
    le32(&mut pipes, 8);
    pipes.extend_from_slice(&pipe);

    let mut data = Vec::new();
    let total = 16 + 4 + pipes.len() as u32 + 4;
    le32(&mut data, total);
    le32(&mut data, 16);
    le32(&mut data, 20);
    le32(&mut data, 20 + pipes.len() as u32);
    le32(&mut data, 4);
    data.extend_from_slice(&pipes);
    le32(&mut data, 4);

    assert!(matches!(
        GraphDescriptor::decode(&data),
        Err(WireError::FieldCountTooSmall {
            what: "Pipe",
            expected: 3,
            actual: 2
        })
    ));
}

#[test]
fn rejects_data_table_with_extra_field() {
    let mut data = Vec::new();
    le32(&mut data, 36);
    le32(&mut data, 20);
    le32(&mut data, 24);
    le32(&mut data, 28);
    le32(&mut data, 32);
    for _ in 0..4 {
        le32(&mut data, 4);
    }
    assert!(matches!(
        GraphDescriptor::decode(&data),
        Err(WireError::ExtraFields { what: "Data", .. })
    ));
}
