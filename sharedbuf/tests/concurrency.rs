use sharedbuf::{Device, DeviceConfig, OpenOptions, Whence};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn big_device() -> Device {
    Device::new(DeviceConfig::with_max_capacity(64 * 1024 * 1024)).unwrap()
}

/// Overwrite the buffer with `size` bytes of 'A'
fn rewrite_buffer(device: &Device, size: usize) {
    let mut session = device
        .open(OpenOptions::new().write(true).truncate(true))
        .unwrap();
    session.write(&vec![b'A'; size]).unwrap();
}

/// Read `size` bytes from offset 0 `reps` times back to back, returning when
/// the first read started and the last one ended
fn timed_reads(
    device: &Device,
    size: usize,
    reps: u32,
    barrier: Option<&Barrier>,
) -> (Instant, Instant) {
    let mut session = device.open(OpenOptions::new().read(true)).unwrap();
    // Touch every page up front so page faults stay out of the timing
    let mut buf = vec![1u8; size];
    if let Some(barrier) = barrier {
        barrier.wait();
    }
    let start = Instant::now();
    for _ in 0..reps {
        session.seek(Whence::Set, 0).unwrap();
        let n = session.read(&mut buf).unwrap();
        assert_eq!(n, size);
    }
    let end = Instant::now();
    (start, end)
}

fn single_read_duration(device: &Device, size: usize, reps: u32) -> Duration {
    (0..3)
        .map(|_| {
            let (start, end) = timed_reads(device, size, reps, None);
            end - start
        })
        .min()
        .unwrap()
}

fn parallel_read_duration(device: &Device, size: usize, reps: u32) -> Duration {
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let device = device.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || timed_reads(&device, size, reps, Some(&barrier)))
        })
        .collect();
    let spans: Vec<(Instant, Instant)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let start = spans.iter().map(|s| s.0).min().unwrap();
    let end = spans.iter().map(|s| s.1).max().unwrap();
    end - start
}

#[test]
fn test_parallel_reads_do_not_serialize() {
    let device = big_device();
    let size = 8 * 1024 * 1024;
    rewrite_buffer(&device, size);

    // Repeat the read until one thread's run takes a measurable time
    let threshold = Duration::from_millis(20);
    let mut reps = 1;
    let mut single = single_read_duration(&device, size, reps);
    while single < threshold {
        reps *= 2;
        single = single_read_duration(&device, size, reps);
    }

    let parallel = (0..3)
        .map(|_| parallel_read_duration(&device, size, reps))
        .min()
        .unwrap();

    assert!(
        parallel.as_secs_f64() < single.as_secs_f64() * 1.5,
        "reads did not run concurrently: reps={reps}, single={single:?}, parallel={parallel:?}"
    );
}

#[test]
fn test_concurrent_appends_lose_nothing() {
    let device = big_device();
    let mut clearer = device.open(OpenOptions::new().write(true)).unwrap();
    clearer.write(b"leftover").unwrap();
    clearer.clear().unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = ["0", "1", "2", "3"]
        .into_iter()
        .map(|byte| {
            let device = device.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut session = device.open(OpenOptions::new().append(true)).unwrap();
                barrier.wait();
                session.write(byte.as_bytes()).unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 1);
    }

    let mut reader = device.open(OpenOptions::new().read(true)).unwrap();
    let mut buf = [0u8; 16];
    let n = reader.read(&mut buf).unwrap();
    assert_eq!(n, 4);

    let mut got = buf[..n].to_vec();
    got.sort_unstable();
    assert_eq!(got, b"0123");
}

#[test]
fn test_many_appenders_many_bytes() {
    let device = big_device();
    let threads = 8;
    let per_thread = 500;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let device = device.clone();
            thread::spawn(move || {
                let mut session = device.open(OpenOptions::new().append(true)).unwrap();
                let chunk = [b'a' + t as u8; 3];
                for _ in 0..per_thread {
                    session.write(&chunk).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut reader = device.open(OpenOptions::new().read(true)).unwrap();
    let mut data = vec![0u8; threads * per_thread * 3 + 1];
    let n = reader.read(&mut data).unwrap();
    assert_eq!(n, threads * per_thread * 3);

    // Every 3-byte append landed whole
    for chunk in data[..n].chunks(3) {
        assert!(chunk.iter().all(|&b| b == chunk[0]), "torn append: {chunk:?}");
    }
}

#[test]
fn test_readers_never_see_torn_growth() {
    let device = Device::new(DeviceConfig::with_max_capacity(1 << 20)).unwrap();
    let rounds = 200;
    let chunk = 1024;

    let writer = {
        let device = device.clone();
        thread::spawn(move || {
            let mut session = device.open(OpenOptions::new().append(true)).unwrap();
            for round in 0..rounds {
                let byte = b'A' + (round % 26) as u8;
                session.write(&vec![byte; chunk]).unwrap();
            }
        })
    };

    let reader = {
        let device = device.clone();
        thread::spawn(move || {
            let mut session = device.open(OpenOptions::new().read(true)).unwrap();
            let mut buf = vec![0u8; rounds * chunk];
            let mut observed = 0;
            while observed < rounds * chunk {
                session.seek(Whence::Set, 0).unwrap();
                let n = session.read(&mut buf).unwrap();
                // Only whole chunks are ever visible
                assert_eq!(n % chunk, 0);
                for (i, block) in buf[..n].chunks(chunk).enumerate() {
                    let expected = b'A' + (i % 26) as u8;
                    assert!(block.iter().all(|&b| b == expected));
                }
                observed = n;
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(device.stats().size, rounds * chunk);
}
