mod common;

use common::MemWriter;

use std::io::Read;

use anyhow::Result;
use bytestack::{
    BufferOptions, BufferedWriter, Capability, EnumSet, LimitingWriter, StatusCode, Writer,
};

#[test]
fn exact_limits_accept_exactly_enough_data() -> Result<()> {
    let mut mem = MemWriter::new();
    {
        let mut writer: LimitingWriter<'_, MemWriter> = LimitingWriter::new_exact(&mut mem, 10)?;
        writer.write(b"0123456789")?;
        writer.close()?;
    }
    assert_eq!(mem.bytes(), b"0123456789");
    Ok(())
}

#[test]
fn exact_limits_reject_short_streams() -> Result<()> {
    let mut mem = MemWriter::new();
    let mut writer: LimitingWriter<'_, MemWriter> = LimitingWriter::new_exact(&mut mem, 10)?;
    writer.write(b"012345678")?;
    let err = writer.close().unwrap_err();
    assert_eq!(err.code(), StatusCode::InvalidArgument);
    assert!(
        err.message().starts_with("Not enough data: expected 10"),
        "unexpected message: {}",
        err.message()
    );
    Ok(())
}

#[test]
fn overruns_stop_exactly_at_the_limit() -> Result<()> {
    let mut mem = MemWriter::new();
    {
        let mut writer: LimitingWriter<'_, MemWriter> = LimitingWriter::new_exact(&mut mem, 10)?;
        let err = writer.write(b"0123456789a").unwrap_err();
        assert_eq!(err.code(), StatusCode::ResourceExhausted);
        assert!(!writer.healthy());
        assert_eq!(writer.pos(), 10);
        // Closing reports the first latched failure, not the exactness check.
        let err = writer.close().unwrap_err();
        assert_eq!(err.code(), StatusCode::ResourceExhausted);
    }
    assert_eq!(mem.bytes(), b"0123456789");
    Ok(())
}

#[test]
fn positions_never_pass_the_limit() -> Result<()> {
    let mut mem = MemWriter::new();
    {
        let mut writer: LimitingWriter<'_, MemWriter> = LimitingWriter::new(&mut mem, 10)?;
        loop {
            match writer.push(1, 3) {
                Ok(window) => {
                    let n = window.len().min(3);
                    window[..n].fill(0xab);
                    writer.advance(n);
                    assert!(writer.pos() <= 10);
                }
                Err(err) => {
                    assert_eq!(err.code(), StatusCode::ResourceExhausted);
                    break;
                }
            }
        }
        assert_eq!(writer.pos(), 10);
    }
    assert_eq!(mem.bytes().len(), 10);
    Ok(())
}

#[test]
fn all_inner_capabilities_are_preserved() -> Result<()> {
    let mut mem = MemWriter::new();
    let expected = mem.capabilities();
    let mut writer: LimitingWriter<'_, MemWriter> = LimitingWriter::new(&mut mem, 100)?;
    assert_eq!(writer.capabilities(), expected);
    writer.close()?;

    // A streaming inner writer offers less, and the limit hides none of it.
    let mut out: Vec<u8> = Vec::new();
    let sink: BufferedWriter<'_, Vec<u8>> =
        BufferedWriter::new(&mut out, BufferOptions::default());
    let mut writer = LimitingWriter::new(sink, 100)?;
    assert_eq!(
        writer.capabilities(),
        EnumSet::only(Capability::PrefersCopying)
    );
    writer.close()?;
    Ok(())
}

#[test]
fn sizes_and_seeks_are_clamped() -> Result<()> {
    let mut mem = MemWriter::new();
    mem.write(&[0x55; 20])?;
    mem.seek(8)?;
    {
        let mut writer: LimitingWriter<'_, MemWriter> = LimitingWriter::new(&mut mem, 10)?;
        assert_eq!(writer.size()?, 10);
        writer.seek(3)?;
        assert_eq!(writer.pos(), 3);

        let err = writer.seek(12).unwrap_err();
        assert_eq!(err.code(), StatusCode::InvalidArgument);
        assert!(!writer.healthy());
    }
    // The failed seek still left the inner writer at the limit.
    assert_eq!(mem.pos(), 10);
    Ok(())
}

#[test]
fn truncation_is_clamped() -> Result<()> {
    let mut mem = MemWriter::new();
    mem.write(&[0x55; 20])?;
    mem.seek(5)?;
    let mut writer: LimitingWriter<'_, MemWriter> = LimitingWriter::new(&mut mem, 10)?;
    writer.truncate(7)?;
    assert_eq!(writer.size()?, 7);

    let err = writer.truncate(15).unwrap_err();
    assert_eq!(err.code(), StatusCode::InvalidArgument);
    Ok(())
}

#[test]
fn read_mode_reaches_through_the_limit() -> Result<()> {
    let mut mem = MemWriter::new();
    let mut writer: LimitingWriter<'_, MemWriter> = LimitingWriter::new(&mut mem, 100)?;
    writer.write(b"hello world")?;
    assert!(writer.capabilities().contains(Capability::ReadMode));
    let reader = writer.read_mode(6)?;
    let mut rest = String::new();
    reader.read_to_string(&mut rest)?;
    assert_eq!(rest, "world");
    Ok(())
}

#[test]
fn a_limited_stack_is_the_identity_below_the_limit() -> Result<()> {
    let data: Vec<u8> = (0..500u32).map(|i| i as u8).collect();
    let mut out: Vec<u8> = Vec::new();
    {
        let sink: BufferedWriter<'_, Vec<u8>> =
            BufferedWriter::new(&mut out, BufferOptions::new().buffer_size(16));
        let mut writer = LimitingWriter::new(sink, 1 << 20)?;
        writer.write(&data)?;
        writer.close()?;
    }
    assert_eq!(out, data);
    Ok(())
}
