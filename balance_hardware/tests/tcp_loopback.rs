//! Drives `TcpLineTransport` against a loopback listener acting as the balance.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

use balance_hardware::tcp::MAX_LINE_BYTES;
use balance_hardware::{HwError, TcpConnector};
use balance_traits::{Connector, LineTransport};
use rstest::rstest;

/// Spawn a one-connection device that answers each received line with `reply(line)`.
fn spawn_device<F>(reply: F) -> (u16, thread::JoinHandle<Vec<String>>)
where
    F: Fn(&str) -> Option<String> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let reader = BufReader::new(stream);
        let mut seen = Vec::new();
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let line = line.trim_end_matches('\r').to_string();
            if let Some(out) = reply(&line) {
                writer.write_all(out.as_bytes()).unwrap();
            }
            seen.push(line);
        }
        seen
    });
    (port, handle)
}

#[test]
fn exchanges_crlf_lines_with_device() {
    let (port, device) = spawn_device(|cmd| match cmd {
        "SI" => Some("SI S     100.05 mg\r\n".to_string()),
        _ => Some("ES\r\n".to_string()),
    });
    let connector = TcpConnector::new("127.0.0.1", port);
    let mut t = connector.connect(Duration::from_secs(2)).unwrap();

    t.write_line("SI").unwrap();
    let line = t.read_line(Duration::from_secs(2)).unwrap();
    assert_eq!(line.as_deref(), Some("SI S     100.05 mg"));

    t.write_line("BOGUS").unwrap();
    assert_eq!(t.read_line(Duration::from_secs(2)).unwrap().as_deref(), Some("ES"));

    t.close();
    let seen = device.join().unwrap();
    assert_eq!(seen, vec!["SI".to_string(), "BOGUS".to_string()]);
}

#[test]
fn silent_device_yields_none_not_error() {
    let (port, _device) = spawn_device(|_| None);
    let connector = TcpConnector::new("127.0.0.1", port);
    let mut t = connector.connect(Duration::from_secs(2)).unwrap();
    t.write_line("SI").unwrap();
    assert_eq!(t.read_line(Duration::from_millis(50)).unwrap(), None);
}

#[test]
fn split_line_is_reassembled_across_reads() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let device = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(b"SI D   ").unwrap();
        stream.flush().unwrap();
        thread::sleep(Duration::from_millis(80));
        stream.write_all(b"  12.5 g\r\n").unwrap();
        thread::sleep(Duration::from_millis(50));
    });
    let mut t = TcpConnector::new("127.0.0.1", port)
        .connect(Duration::from_secs(2))
        .unwrap();
    assert_eq!(t.read_line(Duration::from_millis(20)).unwrap(), None);
    let line = t.read_line(Duration::from_secs(2)).unwrap();
    assert_eq!(line.as_deref(), Some("SI D     12.5 g"));
    device.join().unwrap();
}

#[test]
fn peer_close_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let device = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
    });
    let mut t = TcpConnector::new("127.0.0.1", port)
        .connect(Duration::from_secs(2))
        .unwrap();
    device.join().unwrap();
    let err = t
        .read_line(Duration::from_secs(2))
        .expect_err("closed peer must error");
    assert!(matches!(
        err.downcast_ref::<HwError>(),
        Some(HwError::Closed) | Some(HwError::Io(_))
    ));
}

#[rstest]
#[case("127.0.0.1")]
#[case("localhost")]
fn refused_port_reports_refusal(#[case] host: &str) {
    // Bind then drop to obtain a port with nothing listening.
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let err = TcpConnector::new(host, port)
        .open(Duration::from_millis(500))
        .err()
        .expect("nothing listens on the port");
    assert!(
        matches!(err, HwError::Refused(_) | HwError::ConnectTimeout(_) | HwError::Io(_)),
        "{err:?}"
    );
}

/// Device that writes `chunk` every `every` with no line terminator, until the peer goes away.
fn spawn_unterminated(chunk: &'static [u8], every: Duration) -> (u16, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let started = Instant::now();
        while started.elapsed() < Duration::from_secs(5) {
            if stream.write_all(chunk).is_err() {
                break;
            }
            thread::sleep(every);
        }
    });
    (port, handle)
}

#[test]
fn unterminated_flood_hits_the_line_cap() {
    let (port, device) = spawn_unterminated(&[b'A'; 64], Duration::from_millis(1));
    let mut t = TcpConnector::new("127.0.0.1", port)
        .connect(Duration::from_secs(2))
        .unwrap();

    let started = Instant::now();
    let res = t.read_line(Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_secs(1), "read_line overran its timeout");
    let err = res.expect_err("an unterminated flood must not yield a line");
    let hw = err.downcast_ref::<HwError>();
    assert!(matches!(hw, Some(HwError::LineTooLong(n)) if *n > MAX_LINE_BYTES), "{err:?}");
    t.close();
    device.join().unwrap();
}

#[test]
fn trickling_bytes_still_respect_the_deadline() {
    let (port, device) = spawn_unterminated(b"S", Duration::from_millis(5));
    let mut t = TcpConnector::new("127.0.0.1", port)
        .connect(Duration::from_secs(2))
        .unwrap();

    let started = Instant::now();
    assert_eq!(t.read_line(Duration::from_millis(100)).unwrap(), None);
    assert!(started.elapsed() < Duration::from_secs(1), "read_line overran its timeout");
    t.close();
    device.join().unwrap();
}
