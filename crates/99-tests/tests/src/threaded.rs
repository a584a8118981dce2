use crate::harness::{payload, Device, SMALL_CAPACITY};
use anyhow::Result;
use host_backend::{HostBackend, MemorySink};
use rand::prelude::*;
use shared_region::RegionConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Ticks the host until `done` is raised.
fn run_ticker<'s>(
    scope: &'s thread::Scope<'s, '_>,
    host: &'s HostBackend<MemorySink>,
    done: &'s AtomicBool,
) -> thread::ScopedJoinHandle<'s, Result<usize>> {
    scope.spawn(move || {
        let mut delivered = 0;
        while !done.load(Ordering::Acquire) {
            let count = host.tick()?;
            if count == 0 {
                thread::yield_now();
            }
            delivered += count;
        }
        Ok(delivered)
    })
}

fn random_records(seed: u64, count: usize, max_len: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| payload(rng.gen_range(1..max_len), i as u32 ^ seed as u32))
        .collect()
}

#[test]
fn producers_and_host_ticker_run_concurrently() -> Result<()> {
    const SCREENS: u32 = 2;
    let device = Device::new(RegionConfig::default(), SCREENS)?;
    let streams: Vec<Vec<Vec<u8>>> = (0..SCREENS)
        .map(|screen| random_records(0xA11CE + u64::from(screen), 400, 4000))
        .collect();
    let done = AtomicBool::new(false);

    let ticked = thread::scope(|scope| -> Result<usize> {
        let ticker = run_ticker(scope, &device.host, &done);
        let producers: Vec<_> = streams
            .iter()
            .enumerate()
            .map(|(screen, records)| {
                let display = &device.display;
                scope.spawn(move || -> Result<()> {
                    for record in records {
                        display.write_record(screen as u32, record)?;
                    }
                    Ok(())
                })
            })
            .collect();

        for producer in producers {
            producer.join().expect("producer panicked")?;
        }
        done.store(true, Ordering::Release);
        ticker.join().expect("ticker panicked")
    })?;

    device.flush()?;
    let delivered = device.take_records(SCREENS);
    let total: usize = streams.iter().map(Vec::len).sum();
    assert!(ticked <= total);
    assert_eq!(delivered, streams);
    Ok(())
}

#[test]
fn ticker_never_delivers_torn_records() -> Result<()> {
    let device = Device::small(1)?;
    let records = random_records(7, 200, 3 * SMALL_CAPACITY as usize);
    let done = AtomicBool::new(false);

    thread::scope(|scope| -> Result<()> {
        let ticker = run_ticker(scope, &device.host, &done);
        for record in &records {
            device.display.with_writer(0, |writer| -> Result<()> {
                writer.begin_record()?;
                for chunk in record.chunks(97) {
                    writer.write(chunk)?;
                }
                writer.end_record()?;
                Ok(())
            })??;
        }
        done.store(true, Ordering::Release);
        ticker.join().expect("ticker panicked")?;
        Ok(())
    })?;

    device.flush()?;
    assert_eq!(device.take_records(1), vec![records]);
    Ok(())
}
