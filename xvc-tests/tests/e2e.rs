//! End-to-end coverage driving a real `TcpListener`-backed
//! `xvc_server::server::Server` with `xvc_client::XvcClient`, exercising
//! spec.md §8's scenarios against a mock backend rather than real
//! hardware.
use std::io::Read;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use xvc_client::XvcClient;
use xvc_server::XvcServer;
use xvc_server::server::{Config, Server};

/// A stateless bypass TAP: TDO equals TMS, TCK always settles at 50ns.
struct BypassTap {
    max_vector_len: u32,
}

impl XvcServer for BypassTap {
    fn set_tck(&self, _period_ns: u32) -> u32 {
        50
    }

    fn max_vector_len(&self) -> u32 {
        self.max_vector_len
    }

    fn shift(&self, _num_bits: u32, tms: Box<[u8]>, _tdi: Box<[u8]>) -> Box<[u8]> {
        tms
    }
}

fn spawn_server(port: u16, max_vector_len: u32) {
    let server = Server::new(
        BypassTap { max_vector_len },
        Config {
            max_vector_size: max_vector_len,
            read_write_timeout: Duration::from_secs(5),
        },
    );
    thread::spawn(move || {
        server.listen(("127.0.0.1", port)).unwrap();
    });
    // Give the listener a moment to bind before the test connects.
    thread::sleep(Duration::from_millis(50));
}

#[test]
fn getinfo_reports_the_configured_max_vector_len() {
    spawn_server(17001, 32768);
    let mut client = XvcClient::new(("127.0.0.1", 17001)).unwrap();
    let info = client.get_info().unwrap();
    assert_eq!(info.max_vector_size(), 32768);
}

#[test]
fn settck_echoes_the_device_reported_period() {
    spawn_server(17002, 32768);
    let mut client = XvcClient::new(("127.0.0.1", 17002)).unwrap();
    let actual = client.set_tck(40).unwrap();
    assert_eq!(actual, 50);
}

#[test]
fn shift_against_a_bypass_tap_reaches_select_dr_scan() {
    spawn_server(17003, 32768);
    let mut client = XvcClient::new(("127.0.0.1", 17003)).unwrap();

    // 24 TCK cycles: TMS low drives Test-Logic-Reset -> Run-Test/Idle on
    // the first cycle, low holds Run-Test/Idle, then a single TMS high on
    // the last cycle (bit 23, the top bit of the third byte) advances to
    // Select-DR-Scan.
    let tms = [0x00u8, 0x00, 0x80];
    let tdi = [0x00u8, 0x00, 0x00];
    let tdo = client.shift(24, &tms, &tdi).unwrap();
    assert_eq!(&tdo[..], &tms[..]);

    let mut tracer = xvc_tap_trace::JtagTracer::new();
    tracer.process(24, &tms, &tdo, &tdi);
    assert_eq!(tracer.state(), xvc_tap_trace::TapState::SelectDrScan);
}

#[test]
fn a_second_client_is_rejected_while_a_session_is_active() {
    spawn_server(17004, 32768);

    let mut client1 = XvcClient::new(("127.0.0.1", 17004)).unwrap();
    // Give the server's handle_client loop time to start and perform its
    // first (empty) concurrent-client check before client2 connects.
    thread::sleep(Duration::from_millis(50));

    let mut client2 = TcpStream::connect(("127.0.0.1", 17004)).unwrap();

    // Waking client1's blocked read re-enters the loop, where the
    // pending client2 connection gets accepted and dropped.
    let info = client1.get_info().unwrap();
    assert_eq!(info.max_vector_size(), 32768);

    thread::sleep(Duration::from_millis(50));
    let mut buf = [0u8; 1];
    let n = client2.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "second client's connection should have been closed");

    // The first session keeps working after the second was rejected.
    let actual = client1.set_tck(40).unwrap();
    assert_eq!(actual, 50);
}
