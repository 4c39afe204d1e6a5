use sharedbuf::{
    ConfigError, ControlReply, Device, DeviceConfig, Error, OpenOptions, Whence, CONTROL_CLEAR,
};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn read_all(device: &Device) -> Vec<u8> {
    let mut reader = device.open(OpenOptions::new().read(true)).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

#[test]
fn test_write_then_append_from_second_session() {
    init_tracing();
    let device = Device::new(DeviceConfig::default()).unwrap();

    let mut first = device.open(OpenOptions::new().write(true)).unwrap();
    assert_eq!(first.write(b"foo").unwrap(), 3);

    let mut second = device.open(OpenOptions::new().append(true)).unwrap();
    assert_eq!(second.write(b"bar").unwrap(), 3);
    assert_eq!(second.position(), 6);

    assert_eq!(read_all(&device), b"foobar");
}

#[test]
fn test_clear_through_control() {
    init_tracing();
    let device = Device::new(DeviceConfig::default()).unwrap();
    let mut session = device
        .open(OpenOptions::new().read(true).write(true))
        .unwrap();
    session.write(b"hello-world").unwrap();

    let capacity = device.stats().capacity;
    assert!(matches!(
        session.control(CONTROL_CLEAR, 0).unwrap(),
        ControlReply::Done
    ));

    session.seek(Whence::Set, 0).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(session.read(&mut buf).unwrap(), 0);
    assert_eq!(device.stats().size, 0);
    assert_eq!(device.stats().capacity, capacity);

    // Cleared bytes read back as zeros once the size covers them again
    session.seek(Whence::Set, 10).unwrap();
    session.write(b"!").unwrap();
    session.seek(Whence::Set, 0).unwrap();
    let n = session.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"\0\0\0\0\0\0\0\0\0\0!");
}

#[test]
fn test_unknown_control_code() {
    let device = Device::new(DeviceConfig::default()).unwrap();
    let mut session = device.open(OpenOptions::new().write(true)).unwrap();
    session.write(b"kept").unwrap();

    let err = session.control(0xDEAD, 0).unwrap_err();
    assert_eq!(err, Error::Unsupported(0xDEAD));
    assert_eq!(err.errno(), 25);
    assert_eq!(read_all(&device), b"kept");
}

#[test]
fn test_truncate_on_open() {
    let device = Device::new(DeviceConfig::default()).unwrap();
    let mut writer = device.open(OpenOptions::new().write(true)).unwrap();
    writer.write(b"stale data").unwrap();

    let mut fresh = device
        .open(OpenOptions::new().read(true).write(true).truncate(true))
        .unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(fresh.read(&mut buf).unwrap(), 0);
    assert!(read_all(&device).is_empty());

    // The old session writes at its own cursor; the gap reads as zeros
    writer.write(b"!").unwrap();
    assert_eq!(read_all(&device), b"\0\0\0\0\0\0\0\0\0\0!");
}

#[test]
fn test_write_past_initial_capacity() {
    init_tracing();
    let config = DeviceConfig {
        initial_capacity: 1024,
        ..DeviceConfig::default()
    };
    let device = Device::new(config).unwrap();
    assert_eq!(device.stats().capacity, 1024);

    let data: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
    let mut session = device
        .open(OpenOptions::new().read(true).write(true))
        .unwrap();
    assert_eq!(session.write(&data).unwrap(), 2048);
    assert_eq!(device.stats().capacity, 2048);

    session.seek(Whence::Set, 0).unwrap();
    let mut head = [0u8; 10];
    assert_eq!(session.read(&mut head).unwrap(), 10);
    assert_eq!(head, data[..10]);
    assert_eq!(read_all(&device), data);
}

#[test]
fn test_stats_track_sessions_and_counters() {
    let device = Device::new(DeviceConfig::default()).unwrap();
    let mut writer = device.open(OpenOptions::new().write(true)).unwrap();
    let mut reader = device.open(OpenOptions::new().read(true)).unwrap();

    writer.write(b"one").unwrap();
    writer.write(b"two").unwrap();
    let mut buf = [0u8; 4];
    reader.read(&mut buf).unwrap();
    // Empty requests are not counted
    writer.write(b"").unwrap();
    reader.read(&mut [0u8; 0]).unwrap();

    let stats = device.stats();
    assert_eq!(stats.size, 6);
    assert_eq!(stats.write_count, 2);
    assert_eq!(stats.read_count, 1);
    assert_eq!(stats.open_sessions, 2);
    assert_eq!(stats.max_capacity, 10 * 1024 * 1024);

    // A read at end of data still counts
    reader.seek(Whence::Set, 100).unwrap();
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
    assert_eq!(device.stats().read_count, 2);

    drop(reader);
    writer.close();
    assert_eq!(device.stats().open_sessions, 0);
}

#[test]
fn test_config_from_json_sets_ceiling() {
    let json = br#"{ "max_capacity": 4096, "initial_capacity": 16 }"#;
    let config = DeviceConfig::from_reader(&json[..]).unwrap();
    assert_eq!(config.listener_channel_capacity, 16);

    let device = Device::new(config).unwrap();
    assert_eq!(device.max_capacity(), 4096);
    assert_eq!(device.stats().capacity, 16);

    let mut session = device.open(OpenOptions::new().write(true)).unwrap();
    session.write(&[7u8; 4096]).unwrap();
    assert_eq!(device.stats().capacity, 4096);

    assert!(matches!(
        session.write(b"x"),
        Err(Error::CapacityExceeded { .. })
    ));
    assert_eq!(device.stats().size, 4096);
}

#[test]
fn test_config_rejects_bad_json() {
    let unknown = br#"{ "max_capacity": 4096, "colour": "blue" }"#;
    assert!(matches!(
        DeviceConfig::from_reader(&unknown[..]),
        Err(ConfigError::Parse(_))
    ));

    let inverted = br#"{ "max_capacity": 8, "initial_capacity": 16 }"#;
    assert!(matches!(
        DeviceConfig::from_reader(&inverted[..]),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_session_works_with_std_io_helpers() {
    let device = Device::new(DeviceConfig::default()).unwrap();
    let mut writer = device.open(OpenOptions::new().write(true)).unwrap();
    let mut source = &b"first line\nsecond line\n"[..];
    assert_eq!(std::io::copy(&mut source, &mut writer).unwrap(), 23);

    let mut reader = device.open(OpenOptions::new().read(true)).unwrap();
    Seek::seek(&mut reader, SeekFrom::Start(11)).unwrap();
    let mut lines = BufReader::new(reader).lines();
    assert_eq!(lines.next().unwrap().unwrap(), "second line");
    assert!(lines.next().is_none());
}
