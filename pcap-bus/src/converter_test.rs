use std::{sync::Arc, time::Duration};

use super::Converter;
use crate::{
    config::ConverterConfig,
    error::ConvertError,
    event::{ConvertEvent, ConvertEvents},
    header::GlobalHeader,
    input::read_capture,
    test_utils::{MockDecoder, MockState, packet, write_capture},
};

#[derive(Default)]
struct Collected {
    lines: Vec<String>,
    errors: Vec<ConvertError>,
    ends: usize,
}

/// Drains a conversion until every sender is gone, so a second `End` would be seen.
async fn collect(mut events: ConvertEvents) -> Collected {
    let mut out = Collected::default();
    while let Some(event) = events.recv().await {
        match event {
            ConvertEvent::Packet(line) => out.lines.push(line),
            ConvertEvent::Error(err) => out.errors.push(err),
            ConvertEvent::End => out.ends += 1,
        }
    }
    out
}

async fn collect_within(events: ConvertEvents) -> anyhow::Result<Collected> {
    Ok(tokio::time::timeout(Duration::from_secs(30), collect(events)).await?)
}

fn converter(
    dir: &std::path::Path,
    decoder: MockDecoder,
) -> (Converter, Arc<MockState>) {
    let state = decoder.state();
    let config = ConverterConfig::builder().temp_dir(dir).build();
    (Converter::new(config, decoder), state)
}

fn sorted(mut counts: Vec<u64>) -> Vec<u64> {
    counts.sort();
    counts
}

// ---------------------------------------------------------------------------
// Stream mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stream_rotates_by_count_and_flushes_remainder() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (converter, state) = converter(dir.path(), MockDecoder::new());

    let (queue, events) = converter.open_stream();
    queue.set_global_header(GlobalHeader::ethernet(65535));
    for seq in 0..2500 {
        assert!(queue.offer(packet(seq, 60)));
    }
    queue.finish();

    let out = collect_within(events).await?;
    assert_eq!(out.ends, 1);
    assert!(out.errors.is_empty(), "unexpected errors: {:?}", out.errors);
    assert_eq!(out.lines.len(), 2500);
    assert_eq!(sorted(state.packet_counts()), vec![500, 1000, 1000]);

    let metrics = converter.metrics().snapshot();
    assert_eq!(metrics.incoming_packet_count, 2500);
    assert_eq!(metrics.outgoing_packet_count, 2500);
    assert_eq!(metrics.incoming_data, 2500 * 60);
    assert_eq!(metrics.outgoing_data, 2500 * 60);
    assert_eq!(metrics.dropped_packet_count, 0);
    assert_eq!(metrics.decode_queue, 0);

    // decoded segments are deleted
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_spaced_packets_rotate_by_age() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (converter, state) = converter(dir.path(), MockDecoder::new());

    let (queue, events) = converter.open_stream();
    queue.set_global_header(GlobalHeader::ethernet(65535));
    let producer = tokio::spawn(async move {
        for seq in 0..3 {
            queue.offer(packet(seq, 60));
            tokio::time::sleep(Duration::from_secs(6)).await;
        }
        queue.finish();
    });

    let out = collect(events).await;
    producer.await?;

    assert_eq!(out.ends, 1);
    assert_eq!(out.lines.len(), 3);
    assert_eq!(state.packet_counts(), vec![1, 1, 1]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_packet_at_age_limit_opens_new_segment() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (converter, state) = converter(dir.path(), MockDecoder::new());

    let (queue, events) = converter.open_stream();
    queue.set_global_header(GlobalHeader::ethernet(65535));
    let producer = tokio::spawn(async move {
        for seq in 0..4 {
            if seq > 0 {
                tokio::time::sleep(Duration::from_millis(5000)).await;
            }
            queue.offer(packet(seq, 60));
        }
        queue.finish();
    });

    let out = collect(events).await;
    producer.await?;

    assert_eq!(out.ends, 1);
    assert_eq!(out.lines.len(), 4);
    assert_eq!(state.packet_counts(), vec![1, 1, 1, 1]);
    Ok(())
}

#[tokio::test]
async fn test_packet_before_header_reported_once() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (converter, state) = converter(dir.path(), MockDecoder::new());

    let (queue, events) = converter.open_stream();
    queue.offer(packet(0, 60));
    queue.set_global_header(GlobalHeader::ethernet(65535));
    queue.offer(packet(1, 60));
    queue.finish();

    let out = collect_within(events).await?;
    assert_eq!(out.ends, 1);
    assert_eq!(out.errors.len(), 1);
    assert!(matches!(out.errors[0], ConvertError::MissingHeader));
    assert_eq!(out.lines.len(), 1);
    assert_eq!(state.packet_counts(), vec![1]);
    Ok(())
}

#[tokio::test]
async fn test_empty_stream_ends_without_decoding() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (converter, state) = converter(dir.path(), MockDecoder::new());

    let (queue, events) = converter.open_stream();
    queue.finish();

    let out = collect_within(events).await?;
    assert_eq!(out.ends, 1);
    assert!(out.lines.is_empty());
    assert!(out.errors.is_empty());
    assert!(state.packet_counts().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_dropped_queue_ends_conversion() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (converter, _state) = converter(dir.path(), MockDecoder::new());

    let (queue, events) = converter.open_stream();
    queue.set_global_header(GlobalHeader::ethernet(65535));
    queue.offer(packet(0, 60));
    drop(queue);

    let out = collect_within(events).await?;
    assert_eq!(out.ends, 1);
    assert_eq!(out.lines.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_decode_failure_keeps_segments() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (converter, _state) = converter(dir.path(), MockDecoder::new().with_exit_code(Some(3)));

    let (queue, events) = converter.open_stream();
    queue.set_global_header(GlobalHeader::ethernet(65535));
    for seq in 0..1500 {
        queue.offer(packet(seq, 60));
    }
    queue.finish();

    let out = collect_within(events).await?;
    assert_eq!(out.ends, 1);
    assert_eq!(out.errors.len(), 2);
    assert!(
        out.errors
            .iter()
            .all(|e| matches!(e, ConvertError::DecodeProcess { code: Some(3), .. }))
    );
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 2);
    assert_eq!(converter.metrics().outgoing_packet_count.get(), 0);
    Ok(())
}

#[tokio::test]
async fn test_failed_cleanup_reported_after_decode() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (converter, state) = converter(dir.path(), MockDecoder::new().with_removed_segment());

    let (queue, events) = converter.open_stream();
    queue.set_global_header(GlobalHeader::ethernet(65535));
    for seq in 0..3 {
        queue.offer(packet(seq, 60));
    }
    queue.finish();

    let out = collect_within(events).await?;
    assert_eq!(out.ends, 1);
    assert_eq!(out.lines.len(), 3);
    assert_eq!(out.errors.len(), 1);
    assert!(matches!(
        &out.errors[0],
        ConvertError::Io(e) if e.kind() == std::io::ErrorKind::NotFound
    ));
    assert_eq!(state.packet_counts(), vec![3]);

    // the decode itself succeeded
    let metrics = converter.metrics().snapshot();
    assert_eq!(metrics.outgoing_packet_count, 3);
    assert_eq!(metrics.outgoing_data, 3 * 60);
    Ok(())
}

#[tokio::test]
async fn test_unusable_temp_dir_reported_per_packet() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (converter, state) = converter(&dir.path().join("missing"), MockDecoder::new());

    let (queue, events) = converter.open_stream();
    queue.set_global_header(GlobalHeader::ethernet(65535));
    for seq in 0..3 {
        queue.offer(packet(seq, 60));
    }
    queue.finish();

    let out = collect_within(events).await?;
    assert_eq!(out.ends, 1);
    assert!(out.lines.is_empty());
    assert_eq!(out.errors.len(), 3);
    assert!(out.errors.iter().all(|e| matches!(
        e,
        ConvertError::Io(e) if e.kind() == std::io::ErrorKind::NotFound
    )));
    assert!(state.packet_counts().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_bounded_queue_drops_overflow() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = ConverterConfig::builder()
        .temp_dir(dir.path())
        .max_packet_queue_size(10)
        .build();
    let converter = Converter::new(config, MockDecoder::new());

    let (queue, events) = converter.open_stream();
    queue.set_global_header(GlobalHeader::ethernet(65535));
    // the pipeline cannot run before the first await, so only the capacity is admitted
    let admitted = (0..100).filter(|seq| queue.offer(packet(*seq, 60))).count();
    queue.finish();

    let out = collect_within(events).await?;
    assert_eq!(admitted, 10);
    assert_eq!(out.lines.len(), 10);
    let metrics = converter.metrics().snapshot();
    assert_eq!(metrics.dropped_packet_count, 90);
    assert_eq!(metrics.incoming_packet_count, 10);
    Ok(())
}

// ---------------------------------------------------------------------------
// Reader and path mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_convert_reader() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let capture = dir.path().join("input.pcap");
    write_capture(&capture, 42)?;
    let segments = tempfile::tempdir()?;
    let (converter, state) = converter(segments.path(), MockDecoder::new());

    let reader = std::io::Cursor::new(std::fs::read(&capture)?);
    let out = collect_within(converter.convert_reader("stdin", reader)).await?;

    assert_eq!(out.ends, 1);
    assert_eq!(out.lines.len(), 42);
    assert_eq!(state.packet_counts(), vec![42]);
    Ok(())
}

#[tokio::test]
async fn test_convert_stream_forwards_parse_errors() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (converter, state) = converter(dir.path(), MockDecoder::new());

    let garbage = std::io::Cursor::new(vec![0u8; 64]);
    let out = collect_within(converter.convert_stream(read_capture("bad.pcap", garbage))).await?;

    assert_eq!(out.ends, 1);
    assert_eq!(out.errors.len(), 1);
    assert!(matches!(out.errors[0], ConvertError::Parse { .. }));
    assert!(state.packet_counts().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_convert_path_directory() -> anyhow::Result<()> {
    let input = tempfile::tempdir()?;
    std::fs::create_dir_all(input.path().join("nested"))?;
    write_capture(&input.path().join("a.pcap"), 3)?;
    write_capture(&input.path().join("nested/b.pcap"), 1200)?;
    std::fs::write(input.path().join("notes.txt"), "skip me")?;

    let segments = tempfile::tempdir()?;
    let (converter, state) = converter(segments.path(), MockDecoder::new());

    let out = collect_within(converter.convert_path(input.path()).await?).await?;
    assert_eq!(out.ends, 1);
    assert!(out.errors.is_empty(), "unexpected errors: {:?}", out.errors);
    assert_eq!(out.lines.len(), 1203);
    assert_eq!(sorted(state.packet_counts()), vec![3, 200, 1000]);
    Ok(())
}

#[tokio::test]
async fn test_convert_path_single_file() -> anyhow::Result<()> {
    let input = tempfile::tempdir()?;
    let capture = input.path().join("single.pcap");
    write_capture(&capture, 5)?;
    let segments = tempfile::tempdir()?;
    let (converter, _state) = converter(segments.path(), MockDecoder::new());

    let out = collect_within(converter.convert_path(&capture).await?).await?;
    assert_eq!(out.ends, 1);
    assert_eq!(out.lines.len(), 5);
    Ok(())
}

#[tokio::test]
async fn test_convert_path_continues_after_bad_file() -> anyhow::Result<()> {
    let input = tempfile::tempdir()?;
    std::fs::write(input.path().join("a-broken.pcap"), vec![0u8; 64])?;
    write_capture(&input.path().join("b-good.pcap"), 7)?;
    let segments = tempfile::tempdir()?;
    let (converter, _state) = converter(segments.path(), MockDecoder::new());

    let out = collect_within(converter.convert_path(input.path()).await?).await?;
    assert_eq!(out.ends, 1);
    assert_eq!(out.errors.len(), 1);
    assert!(matches!(out.errors[0], ConvertError::Parse { .. }));
    assert_eq!(out.lines.len(), 7);
    Ok(())
}

#[tokio::test]
async fn test_convert_path_missing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (converter, _state) = converter(dir.path(), MockDecoder::new());

    let result = converter.convert_path(dir.path().join("absent.pcap")).await;
    assert!(matches!(result, Err(ConvertError::SourceRead { .. })));
    Ok(())
}
