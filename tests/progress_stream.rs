// tests/progress_stream.rs

mod common;
use crate::common::init_tracing;

use proptest::prelude::*;

use stagerun::exec::{FrameSplitter, read_progress};

/// Feed `chunks` into a splitter and collect every frame, including the
/// trailing unterminated one.
fn frames_of(chunks: &[&[u8]]) -> Vec<Vec<u8>> {
    let mut splitter = FrameSplitter::new();
    let mut frames = Vec::new();

    for chunk in chunks {
        splitter.extend(chunk);
        while let Some(frame) = splitter.next_frame() {
            frames.push(frame);
        }
    }
    if let Some(frame) = splitter.finish() {
        frames.push(frame);
    }

    frames
}

#[test]
fn splits_on_record_separator() {
    init_tracing();

    let input: &[u8] = b"{\"a\":1}\x1e{\"b\":2}\x1e";
    let frames = frames_of(&[input]);
    assert_eq!(frames, vec![b"{\"a\":1}".to_vec(), b"{\"b\":2}".to_vec()]);
}

#[test]
fn yields_trailing_frame_without_separator_at_end_of_stream() {
    init_tracing();

    let input: &[u8] = b"abc\x1edef";
    let frames = frames_of(&[input]);
    assert_eq!(frames, vec![b"abc".to_vec(), b"def".to_vec()]);
}

#[test]
fn tolerates_byte_at_a_time_chunks() {
    init_tracing();

    let input: &[u8] = b"{\"a\":1}\x1e{\"b\":2}\x1e";
    let chunks: Vec<&[u8]> = input.chunks(1).collect();
    assert_eq!(frames_of(&chunks), frames_of(&[input]));
}

#[test]
fn consecutive_separators_yield_empty_frames() {
    init_tracing();

    let input: &[u8] = b"a\x1e\x1eb\x1e";
    let frames = frames_of(&[input]);
    assert_eq!(frames, vec![b"a".to_vec(), b"".to_vec(), b"b".to_vec()]);
}

proptest! {
    /// However the producer's writes slice the stream, the frames come out
    /// the same.
    #[test]
    fn chunking_never_changes_frames(
        input in prop::collection::vec(any::<u8>(), 0..512),
        cuts in prop::collection::vec(0usize..512, 0..8),
    ) {
        let mut cuts: Vec<usize> = cuts.into_iter().filter(|&c| c <= input.len()).collect();
        cuts.sort_unstable();

        let mut chunks: Vec<&[u8]> = Vec::new();
        let mut start = 0;
        for &cut in &cuts {
            chunks.push(&input[start..cut]);
            start = cut;
        }
        chunks.push(&input[start..]);

        prop_assert_eq!(frames_of(&chunks), frames_of(&[&input[..]]));
    }
}

#[tokio::test]
async fn reader_renders_each_decoded_frame() {
    init_tracing();

    let input: &[u8] = concat!(
        r#"{"message":"start","progress":{"name":"build","total":4,"done":1}}"#,
        "\x1e",
        r#"{"progress":{"name":"build","total":4,"done":2}}"#,
        "\x1e",
    )
    .as_bytes();

    let mut sink: Vec<u8> = Vec::new();
    read_progress(input, &mut sink).await;

    let lines = String::from_utf8(sink).unwrap();
    assert_eq!(
        lines,
        "25% \"build\" (1/4) -> \"start\"\n50% \"build\" (2/4)\n"
    );
}

#[tokio::test]
async fn malformed_frame_is_skipped_not_fatal() {
    init_tracing();

    let input: &[u8] = concat!(
        r#"{"progress":{"name":"a","total":2,"done":1}}"#,
        "\x1e",
        "this is not json",
        "\x1e",
        r#"{"progress":{"name":"b","total":2,"done":2}}"#,
        "\x1e",
    )
    .as_bytes();

    let mut sink: Vec<u8> = Vec::new();
    read_progress(input, &mut sink).await;

    let lines = String::from_utf8(sink).unwrap();
    assert_eq!(lines, "50% \"a\" (1/2)\n100% \"b\" (2/2)\n");
}

#[tokio::test]
async fn final_unterminated_frame_is_rendered_at_end_of_stream() {
    init_tracing();

    let input: &[u8] = br#"{"progress":{"name":"tail","total":1,"done":1}}"#;

    let mut sink: Vec<u8> = Vec::new();
    read_progress(input, &mut sink).await;

    assert_eq!(String::from_utf8(sink).unwrap(), "100% \"tail\" (1/1)\n");
}

#[tokio::test]
async fn empty_stream_renders_nothing() {
    init_tracing();

    let mut sink: Vec<u8> = Vec::new();
    read_progress(&b""[..], &mut sink).await;

    assert!(sink.is_empty());
}
