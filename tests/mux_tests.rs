use reactor_httpd::mux::{Interest, Poller};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;

fn pair() -> (UnixStream, UnixStream) {
    let (a, b) = UnixStream::pair().unwrap();
    a.set_nonblocking(true).unwrap();
    b.set_nonblocking(true).unwrap();
    (a, b)
}

#[test]
fn test_readable_event_reports_fd() {
    let mut poller = Poller::new(8).unwrap();
    let registry = poller.registry();
    let (reader, mut writer) = pair();

    registry.register(reader.as_raw_fd(), Interest::READABLE).unwrap();
    assert!(poller.poll(0).unwrap().is_empty());

    writer.write_all(b"ping").unwrap();
    let events = poller.poll(1000).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].fd, reader.as_raw_fd());
    assert!(events[0].is_readable());
    assert!(!events[0].is_hangup());
}

#[test]
fn test_oneshot_requires_rearm() {
    let mut poller = Poller::new(8).unwrap();
    let registry = poller.registry();
    let (reader, mut writer) = pair();
    let fd = reader.as_raw_fd();
    let interest = Interest::READABLE | Interest::ONESHOT;

    registry.register(fd, interest).unwrap();
    writer.write_all(b"one").unwrap();
    assert_eq!(poller.poll(1000).unwrap().len(), 1);

    writer.write_all(b"two").unwrap();
    assert!(poller.poll(50).unwrap().is_empty());

    registry.modify(fd, interest).unwrap();
    let events = poller.poll(1000).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].fd, fd);
}

#[test]
fn test_edge_triggered_does_not_repeat() {
    let mut poller = Poller::new(8).unwrap();
    let registry = poller.registry();
    let (mut reader, mut writer) = pair();

    registry
        .register(reader.as_raw_fd(), Interest::READABLE | Interest::EDGE)
        .unwrap();
    writer.write_all(b"data").unwrap();
    assert_eq!(poller.poll(1000).unwrap().len(), 1);

    // Unread data does not produce a second edge
    assert!(poller.poll(50).unwrap().is_empty());

    writer.write_all(b"more").unwrap();
    assert_eq!(poller.poll(1000).unwrap().len(), 1);

    let mut buf = [0u8; 16];
    assert_eq!(reader.read(&mut buf).unwrap(), 8);
}

#[test]
fn test_level_triggered_repeats_until_drained() {
    let mut poller = Poller::new(8).unwrap();
    let registry = poller.registry();
    let (mut reader, mut writer) = pair();

    registry.register(reader.as_raw_fd(), Interest::READABLE).unwrap();
    writer.write_all(b"data").unwrap();
    assert_eq!(poller.poll(1000).unwrap().len(), 1);
    assert_eq!(poller.poll(1000).unwrap().len(), 1);

    let mut buf = [0u8; 16];
    reader.read(&mut buf).unwrap();
    assert!(poller.poll(0).unwrap().is_empty());
}

#[test]
fn test_peer_close_is_hangup() {
    let mut poller = Poller::new(8).unwrap();
    let registry = poller.registry();
    let (reader, writer) = pair();

    registry
        .register(reader.as_raw_fd(), Interest::READABLE | Interest::HANGUP)
        .unwrap();
    drop(writer);

    let events = poller.poll(1000).unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_hangup());
}

#[test]
fn test_deregistered_fd_is_silent() {
    let mut poller = Poller::new(8).unwrap();
    let registry = poller.registry();
    let (reader, mut writer) = pair();

    registry.register(reader.as_raw_fd(), Interest::READABLE).unwrap();
    registry.deregister(reader.as_raw_fd()).unwrap();
    writer.write_all(b"ignored").unwrap();

    assert!(poller.poll(50).unwrap().is_empty());
    assert!(registry.deregister(reader.as_raw_fd()).is_err());
}

#[test]
fn test_registry_clone_rearms_from_another_thread() {
    let mut poller = Poller::new(8).unwrap();
    let registry = poller.registry();
    let (reader, mut writer) = pair();
    let fd = reader.as_raw_fd();
    let interest = Interest::READABLE | Interest::ONESHOT;

    registry.register(fd, interest).unwrap();
    writer.write_all(b"x").unwrap();
    assert_eq!(poller.poll(1000).unwrap().len(), 1);

    let worker_registry = registry.clone();
    std::thread::spawn(move || worker_registry.modify(fd, interest).unwrap())
        .join()
        .unwrap();

    assert_eq!(poller.poll(1000).unwrap().len(), 1);
}
