//! Shared buffer CLI demo
//!
//! Appends stdin lines to the shared buffer through one session. A blocking
//! reader thread prints new data as it arrives, and a listener task prints
//! the signals it receives.
//!
//! An optional first argument names a JSON device config file.

use sharedbuf::{Device, DeviceConfig, ListenerId, OpenOptions, Signal, WaitOutcome};
use std::io::{self, BufRead};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => DeviceConfig::from_reader(std::fs::File::open(path)?)?,
        None => DeviceConfig::default(),
    };
    let device = Device::new(config)?;

    let mut writer = device.open(OpenOptions::new().append(true).truncate(true))?;
    let mut reader = device.open(OpenOptions::new().read(true))?;
    let stop_reader = reader.interrupter();

    // Listener task
    let mut signals = writer.subscribe(ListenerId::new(1))?;
    let listener_task = tokio::spawn(async move {
        while let Ok(signal) = signals.recv().await {
            println!("(listener) {signal:?}");
            if signal == Signal::Hangup {
                break;
            }
        }
    });

    // Blocking reader thread
    let reader_thread = std::thread::spawn(move || {
        let mut buf = [0u8; 16];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    println!("(reader) {}", String::from_utf8_lossy(&buf[..n]));
                    continue;
                }
                Err(e) => {
                    eprintln!("(reader) error: {e}");
                    break;
                }
            }
            match reader.wait_readable(Some(Duration::from_millis(500))) {
                // Caught up: data is present but all of it was read
                Ok(WaitOutcome::Ready | WaitOutcome::TimedOut) => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Ok(outcome) => {
                    println!("(reader) stopping: {outcome:?}");
                    break;
                }
                Err(e) => {
                    eprintln!("(reader) error: {e}");
                    break;
                }
            }
        }
    });

    println!("Enter text (empty line to quit):");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Err(e) = writer.write(trimmed.as_bytes()) {
            eprintln!("Write error: {e}");
            break;
        }
    }

    println!("{:?}", device.stats());
    writer.close();
    stop_reader.interrupt();
    device.shutdown();

    let _ = reader_thread.join();
    let _ = listener_task.await;
    println!("All tasks completed");
    Ok(())
}
