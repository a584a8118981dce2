use crate::harness::{payload, Device, OPS, SMALL_CAPACITY};
use anyhow::Result;
use control_channel::ResultCode;
use data_ring::{RingError, RingEvents, DESCRIPTOR_COUNT};
use rand::prelude::*;
use shared_region::RegionConfig;

#[test]
fn records_round_trip_on_one_screen() -> Result<()> {
    let device = Device::new(RegionConfig::default(), 1)?;
    assert_eq!(device.display.host_ops(0), OPS);

    let records: Vec<Vec<u8>> = (1..=20).map(|i| payload(i * 37, i as u32)).collect();
    for record in &records {
        device.display.write_record(0, record)?;
    }
    assert_eq!(device.flush()?, ResultCode::OK);
    assert_eq!(device.take_records(1), vec![records]);
    Ok(())
}

#[test]
fn record_several_times_the_ring_size() -> Result<()> {
    let device = Device::small(1)?;
    let big = payload(3 * SMALL_CAPACITY as usize + 11, 1);
    let tail = payload(40, 2);

    device.display.with_writer(0, |writer| -> Result<()> {
        writer.begin_record()?;
        // Uneven chunks exercise the split at the wrap point.
        for chunk in big.chunks(333) {
            writer.write(chunk)?;
        }
        writer.end_record()?;
        writer.write_record(&tail)?;
        Ok(())
    })??;

    device.flush()?;
    assert_eq!(device.take_records(1), vec![vec![big, tail]]);
    Ok(())
}

#[test]
fn two_thousand_byte_record_spans_flushes() -> Result<()> {
    let device = Device::small(1)?;
    let record = payload(2000, 9);
    device.display.write_record(0, &record)?;

    let view = device.view(0)?;
    assert_eq!(view.descriptor(0)?.len, 2000);
    assert!(!view.descriptor(0)?.is_partial());
    // The last chunk is still in the ring.
    assert!(device.host.with_sink(|sink| sink.records().is_empty()));

    device.flush()?;
    assert_eq!(device.take_records(1), vec![vec![record]]);
    Ok(())
}

#[test]
fn screens_receive_only_their_own_records() -> Result<()> {
    const SCREENS: u32 = 3;
    let device = Device::new(RegionConfig::default(), SCREENS)?;

    let mut expected = vec![Vec::new(); SCREENS as usize];
    for i in 0..60u32 {
        let screen = i % SCREENS;
        let record = payload(64 + i as usize * 5, i);
        device.display.write_record(screen, &record)?;
        expected[screen as usize].push(record);
    }

    device.flush()?;
    assert_eq!(device.take_records(SCREENS), expected);
    Ok(())
}

#[test]
fn disabling_one_screen_leaves_the_others_running() -> Result<()> {
    let device = Device::new(RegionConfig::default(), 2)?;
    device.display.disable(1)?;
    assert!(!device.host.is_enabled(1));
    assert!(device.host.is_enabled(0));

    device.display.write_record(0, b"still here")?;
    assert!(matches!(
        device.display.write_record(1, b"gone"),
        Err(RingError::NotEnabled)
    ));

    device.flush()?;
    assert_eq!(
        device.take_records(2),
        vec![vec![b"still here".to_vec()], Vec::new()]
    );

    // Disabling again is a no-op on both sides.
    device.display.disable(1)?;
    assert_eq!(device.host.with_sink(|sink| sink.disabled().to_vec()), vec![1]);
    Ok(())
}

#[test]
fn many_small_records_recycle_descriptors() -> Result<()> {
    let device = Device::small(1)?;
    let count = DESCRIPTOR_COUNT as usize * 8;
    let records: Vec<Vec<u8>> = (0..count).map(|i| payload(1 + i % 9, i as u32)).collect();

    // Only a full descriptor queue or a full ring forces a flush.
    for record in &records {
        device.display.write_record(0, record)?;
    }
    device.flush()?;
    assert_eq!(device.take_records(1), vec![records]);
    Ok(())
}

#[test]
fn host_reset_mid_record_overflows_until_reenabled() -> Result<()> {
    let device = Device::small(1)?;
    let outcome = device.display.with_writer(0, |writer| -> Result<_> {
        writer.begin_record()?;
        writer.write(&payload(500, 3))?;
        Ok(())
    })?;
    outcome?;

    device.host.disable_all();
    assert_eq!(device.view(0)?.host_events()?, RingEvents::empty());

    // Nothing drains any more, so the record cannot make progress.
    let outcome = device.display.with_writer(0, |writer| {
        let first = writer.write(&payload(800, 4));
        let second = writer.write(b"x");
        let closed = writer.end_record();
        let reopened = writer.begin_record();
        (first, second, closed, reopened)
    })?;
    assert!(matches!(outcome.0, Err(RingError::Overflow)));
    assert!(matches!(outcome.1, Err(RingError::Overflow)));
    assert!(outcome.2.is_ok());
    assert!(matches!(outcome.3, Err(RingError::Overflow)));

    device.display.enable(0)?;
    assert!(device.host.is_enabled(0));
    device.display.write_record(0, b"fresh")?;
    device.flush()?;
    assert_eq!(device.take_records(1), vec![vec![b"fresh".to_vec()]]);
    Ok(())
}

#[test]
fn corrupt_guest_data_tears_down_every_screen() -> Result<()> {
    let device = Device::new(RegionConfig::default(), 2)?;
    device.display.write_record(0, b"screen zero")?;
    device.display.write_record(1, b"screen one")?;

    device.view(1)?.store_tail(DESCRIPTOR_COUNT + 3)?;
    assert_eq!(device.flush()?, ResultCode::NOT_SUPPORTED);
    assert!(!device.host.is_enabled(0));
    assert!(!device.host.is_enabled(1));
    assert_eq!(
        device.host.with_sink(|sink| sink.disabled().to_vec()),
        vec![0, 1]
    );
    assert!(matches!(
        device.display.write_record(0, b"late"),
        Err(RingError::HostDisabled)
    ));

    // A fresh enable clears the damage.
    device.host.with_sink(|sink| sink.take_records());
    device.display.enable(0)?;
    device.display.enable(1)?;
    device.display.write_record(1, b"recovered")?;
    assert_eq!(device.flush()?, ResultCode::OK);
    assert_eq!(
        device.take_records(2),
        vec![Vec::new(), vec![b"recovered".to_vec()]]
    );
    Ok(())
}

fn stream_random_records(seed: u64, count: usize) -> Result<()> {
    let device = Device::small(1)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut expected = Vec::with_capacity(count);

    for i in 0..count {
        let len = if rng.gen_bool(0.2) {
            rng.gen_range(SMALL_CAPACITY as usize..4 * SMALL_CAPACITY as usize)
        } else {
            rng.gen_range(1..200)
        };
        let record = payload(len, i as u32);
        if rng.gen_bool(0.1) {
            device.flush()?;
        }
        device.display.with_writer(0, |writer| -> Result<()> {
            writer.begin_record()?;
            let mut rest = record.as_slice();
            while !rest.is_empty() {
                let take = rng.gen_range(1..=rest.len());
                writer.write(&rest[..take])?;
                rest = &rest[take..];
            }
            writer.end_record()?;
            Ok(())
        })??;
        expected.push(record);
    }

    device.flush()?;
    assert_eq!(device.take_records(1), vec![expected]);
    Ok(())
}

#[test]
fn random_records_through_a_small_ring() -> Result<()> {
    stream_random_records(0xD15_C0DE, 300)
}

#[test]
#[ignore]
fn slow_random_records_through_a_small_ring() -> Result<()> {
    for seed in 0..16 {
        stream_random_records(seed, 5_000)?;
    }
    Ok(())
}
