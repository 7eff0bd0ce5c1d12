//! Stream framing (component C, "AxisToJtag").
//!
//! Packages TMS/TDI vectors into fixed-width JTAG-stream chunks, talks to
//! a concrete [`JtagBackend`] via its `xfer` contract, retries on
//! [`BridgeError::Timeout`] with a doubling backoff, and pads every
//! payload up to the backend's declared word size. Grounded on the
//! header-packing calls visible in `xvcDrvAxiDbgBridgeIP.cc` /
//! `xvcDrvSerDesTmem.cc` (`getHdr`/`setHdr`/`getVrs`/`getCmd`/`getLen`/
//! `mkQueryReply`) and on `xvcConn.cc::allocBufs()`'s query-once-cache
//! behaviour.
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::error::BridgeError;

const RETRY_MAX_ATTEMPTS: u32 = 10;
const RETRY_INITIAL: Duration = Duration::from_millis(10);
const RETRY_CAP: Duration = Duration::from_secs(1);

/// Scratch capacity for one chunk's TX/RX payload. Comfortably above any
/// `max_vector_bytes()` a real driver in this bridge reports.
const SCRATCH_BYTES: usize = 1 << 16;

/// The contract every concrete back-end driver (component D) implements.
pub trait JtagBackend {
    /// Device word size, in bytes. Header/TMS/TDI payloads are padded up
    /// to a whole number of words on the wire.
    fn word_size(&self) -> usize;

    /// Maximum TMS/TDI vector length (bytes) this backend can push
    /// through one `xfer` call. `0` means unconstrained (the backend can
    /// stream arbitrarily large vectors itself).
    fn max_vector_bytes(&self) -> usize;

    /// Consumes the outbound packet from `tx`, writes the inbound header
    /// to `hdr_out` and the inbound payload to `rx_out`, returning the
    /// payload length actually written.
    fn xfer(
        &mut self,
        tx: &[u8],
        hdr_out: &mut [u8; 4],
        rx_out: &mut [u8],
    ) -> Result<usize, BridgeError>;
}

/// Stream command carried in the header's command nibble.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    Shift = 0,
    Query = 1,
}

/// The 32-bit little-endian stream header (see SPEC_FULL.md §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    pub version: u8,
    pub command: Command,
    pub length: u32,
}

impl Header {
    pub const MAX_LENGTH: u32 = (1 << 20) - 1;

    pub fn encode(self) -> [u8; 4] {
        pack_raw(self.version, self.command as u8, self.length)
    }

    pub fn decode(bytes: [u8; 4]) -> Result<Header, BridgeError> {
        let (version, command, length) = unpack_raw(bytes);
        if version != 0 {
            return Err(BridgeError::Proto(format!(
                "unsupported stream header version {version}"
            )));
        }
        let command = match command {
            0 => Command::Shift,
            1 => Command::Query,
            other => {
                return Err(BridgeError::Proto(format!(
                    "unknown stream header command {other}"
                )));
            }
        };
        Ok(Header {
            version,
            command,
            length,
        })
    }
}

/// Packs the raw nibble/length triple with no validation -- used both by
/// [`Header::encode`] and directly by tests proving the bit layout
/// round-trips for the full nibble space.
pub fn pack_raw(version: u8, command: u8, length: u32) -> [u8; 4] {
    let word = ((version as u32 & 0xf) << 28)
        | ((command as u32 & 0xf) << 24)
        | (length & 0x000f_ffff);
    word.to_le_bytes()
}

/// Inverse of [`pack_raw`].
pub fn unpack_raw(bytes: [u8; 4]) -> (u8, u8, u32) {
    let word = u32::from_le_bytes(bytes);
    let version = ((word >> 28) & 0xf) as u8;
    let command = ((word >> 24) & 0xf) as u8;
    let length = word & 0x000f_ffff;
    (version, command, length)
}

/// Answers a `Query` packet in-driver the way `mkQueryReply` does in
/// `xvcDrvAxiDbgBridgeIP.cc`/`xvcDrvSerDesTmem.cc`: a fresh `Query`
/// header plus a 12-byte `(word_size, max_vector_bits, period_ns)`
/// payload, writing into `hdr_out`/`rx_out` and returning the payload
/// length (always 12).
pub fn mk_query_reply(
    word_size: u32,
    max_vector_bits: u32,
    period_ns: u32,
    hdr_out: &mut [u8; 4],
    rx_out: &mut [u8],
) -> usize {
    *hdr_out = Header {
        version: 0,
        command: Command::Query,
        length: 0,
    }
    .encode();

    let mut reply = [0u8; 12];
    reply[0..4].copy_from_slice(&word_size.to_le_bytes());
    reply[4..8].copy_from_slice(&max_vector_bits.to_le_bytes());
    reply[8..12].copy_from_slice(&period_ns.to_le_bytes());

    let n = reply.len().min(rx_out.len());
    rx_out[..n].copy_from_slice(&reply[..n]);
    n
}

struct Cached {
    word_size: usize,
    period_ns: u32,
    max_vector_bits: u32,
}

/// Stream framing wrapping one concrete backend. `&self` methods (to fit
/// [`xvc_server::XvcServer`]'s shape) require interior mutability even
/// though the process is single-threaded end to end -- see SPEC_FULL.md §5.
pub struct AxisToJtag<B: JtagBackend> {
    backend: Mutex<B>,
    cache: Mutex<Option<Cached>>,
}

impl<B: JtagBackend> AxisToJtag<B> {
    pub fn new(backend: B) -> Self {
        AxisToJtag {
            backend: Mutex::new(backend),
            cache: Mutex::new(None),
        }
    }

    /// The backend's own declared chunk capacity, in bytes (`0` = unconstrained).
    pub fn max_vector_bytes(&self) -> usize {
        self.backend.lock().unwrap().max_vector_bytes()
    }

    fn word_size(&self) -> usize {
        self.backend.lock().unwrap().word_size().max(1)
    }

    fn pad_to_word(buf: &mut Vec<u8>, word_size: usize) {
        let rem = buf.len() % word_size;
        if rem != 0 {
            buf.resize(buf.len() + (word_size - rem), 0);
        }
    }

    fn xfer_with_retry(&self, tx: &[u8]) -> Result<([u8; 4], Vec<u8>), BridgeError> {
        let mut delay = RETRY_INITIAL;
        for attempt in 0..=RETRY_MAX_ATTEMPTS {
            let mut hdr_out = [0u8; 4];
            let mut rx_out = vec![0u8; SCRATCH_BYTES];
            let result = {
                let mut backend = self.backend.lock().unwrap();
                backend.xfer(tx, &mut hdr_out, &mut rx_out)
            };
            match result {
                Ok(n) => {
                    rx_out.truncate(n);
                    return Ok((hdr_out, rx_out));
                }
                Err(BridgeError::Timeout) if attempt < RETRY_MAX_ATTEMPTS => {
                    log::warn!(
                        "jtag xfer timed out, retrying in {:?} (attempt {}/{})",
                        delay,
                        attempt + 1,
                        RETRY_MAX_ATTEMPTS
                    );
                    thread::sleep(delay);
                    delay = (delay * 2).min(RETRY_CAP);
                }
                Err(e) => return Err(e),
            }
        }
        Err(BridgeError::Timeout)
    }

    /// Queries device parameters. Always re-issues a `Query` packet (so a
    /// backend that resets transient state on `Q` sees one every time),
    /// but only the first reply ever received populates the cache --
    /// later calls return the cached maximum vector length in bits.
    pub fn query(&self) -> u32 {
        match self.query_raw(0) {
            Ok((word_size, max_vector_bits, period_ns)) => {
                let mut cache = self.cache.lock().unwrap();
                if cache.is_none() {
                    *cache = Some(Cached {
                        word_size,
                        period_ns,
                        max_vector_bits,
                    });
                }
            }
            Err(e) => log::error!("jtag stream query failed: {e}"),
        }
        self.cache
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.max_vector_bits)
            .unwrap_or(0)
    }

    /// Echoes `requested` (nanoseconds) to the device and returns the
    /// achievable period it reports.
    pub fn set_period_ns(&self, requested: u32) -> u32 {
        match self.query_raw(requested) {
            Ok((word_size, max_vector_bits, period_ns)) => {
                *self.cache.lock().unwrap() = Some(Cached {
                    word_size,
                    period_ns,
                    max_vector_bits,
                });
                period_ns
            }
            Err(e) => {
                log::error!("jtag stream setPeriodNs failed: {e}");
                requested
            }
        }
    }

    fn query_raw(&self, requested_period_ns: u32) -> Result<(usize, u32, u32), BridgeError> {
        let hdr = Header {
            version: 0,
            command: Command::Query,
            length: 0,
        };
        let mut tx = hdr.encode().to_vec();
        tx.extend_from_slice(&requested_period_ns.to_le_bytes());

        let (hdr_bytes, rx) = self.xfer_with_retry(&tx)?;
        let reply = Header::decode(hdr_bytes)?;
        if reply.command != Command::Query {
            return Err(BridgeError::Proto(
                "expected a query reply header".to_string(),
            ));
        }
        if rx.len() < 12 {
            return Err(BridgeError::Proto("short query reply".to_string()));
        }
        let word_size = u32::from_le_bytes(rx[0..4].try_into().unwrap()) as usize;
        let max_vector_bits = u32::from_le_bytes(rx[4..8].try_into().unwrap());
        let period_ns = u32::from_le_bytes(rx[8..12].try_into().unwrap());
        Ok((word_size, max_vector_bits, period_ns))
    }

    /// Packs one header + TMS + TDI (each zero-padded to the backend's
    /// word size) and shifts them through the backend, copying the TDO
    /// reply into `tdo_out`.
    pub fn send_vectors(
        &self,
        bits: u32,
        tms: &[u8],
        tdi: &[u8],
        tdo_out: &mut [u8],
    ) -> Result<(), BridgeError> {
        if bits > Header::MAX_LENGTH {
            return Err(BridgeError::Proto("vector too long for one chunk".into()));
        }
        let nbytes = bits.div_ceil(8) as usize;
        if tms.len() != nbytes || tdi.len() != nbytes || tdo_out.len() != nbytes {
            return Err(BridgeError::Proto(
                "TMS/TDI/TDO length mismatch with bit count".into(),
            ));
        }

        let word_size = self.word_size();
        let hdr = Header {
            version: 0,
            command: Command::Shift,
            length: bits,
        };
        let mut tx = hdr.encode().to_vec();
        tx.extend_from_slice(tms);
        Self::pad_to_word(&mut tx, word_size);
        tx.extend_from_slice(tdi);
        Self::pad_to_word(&mut tx, word_size);

        let (hdr_bytes, rx) = self.xfer_with_retry(&tx)?;
        let reply = Header::decode(hdr_bytes)?;
        if reply.command != Command::Shift || reply.length != bits {
            return Err(BridgeError::Proto(
                "stream header mismatch on shift reply".into(),
            ));
        }
        if rx.len() < nbytes {
            return Err(BridgeError::Proto("short TDO reply".into()));
        }
        tdo_out.copy_from_slice(&rx[..nbytes]);
        Ok(())
    }
}

/// Wraps an [`AxisToJtag`] stream and implements [`xvc_server::XvcServer`],
/// splitting an oversized `shift` into `max_vector_bytes()`-sized chunks
/// the way `xvcConn.cc::run()` splits a long vector across writes before
/// ever touching the stream layer.
pub struct JtagDriver<B: JtagBackend> {
    stream: AxisToJtag<B>,
}

impl<B: JtagBackend> JtagDriver<B> {
    pub fn new(backend: B) -> JtagDriver<B> {
        JtagDriver {
            stream: AxisToJtag::new(backend),
        }
    }
}

impl<B: JtagBackend> xvc_server::XvcServer for JtagDriver<B> {
    fn set_tck(&self, period_ns: u32) -> u32 {
        self.stream.set_period_ns(period_ns)
    }

    fn max_vector_len(&self) -> u32 {
        let max_bits = self.stream.query();
        if max_bits == 0 {
            10 * 1024 * 1024
        } else {
            max_bits.div_ceil(8)
        }
    }

    fn shift(&self, num_bits: u32, tms: Box<[u8]>, tdi: Box<[u8]>) -> Box<[u8]> {
        let cap_bytes = self.stream.max_vector_bytes();
        let chunk_bits = if cap_bytes == 0 {
            num_bits.max(1)
        } else {
            ((cap_bytes as u32) * 8).min(Header::MAX_LENGTH)
        };

        let total_bytes = num_bits.div_ceil(8) as usize;
        let mut tdo = vec![0u8; total_bytes];
        let mut bit_off = 0u32;
        while bit_off < num_bits {
            let this_bits = chunk_bits.min(num_bits - bit_off);
            let byte_off = (bit_off / 8) as usize;
            let this_bytes = this_bits.div_ceil(8) as usize;

            let tms_chunk = &tms[byte_off..byte_off + this_bytes];
            let tdi_chunk = &tdi[byte_off..byte_off + this_bytes];
            let tdo_chunk = &mut tdo[byte_off..byte_off + this_bytes];

            if let Err(e) = self.stream.send_vectors(this_bits, tms_chunk, tdi_chunk, tdo_chunk) {
                log::error!("jtag shift failed: {e}");
                return Box::default();
            }
            bit_off += this_bits;
        }
        tdo.into_boxed_slice()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn header_raw_roundtrip_over_full_nibble_space() {
        for version in 0u8..16 {
            for command in 0u8..16 {
                for length in [0u32, 1, 255, 1 << 10, Header::MAX_LENGTH] {
                    let bytes = pack_raw(version, command, length);
                    assert_eq!(unpack_raw(bytes), (version, command, length));
                }
            }
        }
    }

    #[test]
    fn query_reply_carries_word_size_and_echoes_a_query_header() {
        let mut hdr_out = [0u8; 4];
        let mut rx_out = [0xffu8; 12];
        let n = mk_query_reply(4, 0, 0, &mut hdr_out, &mut rx_out);
        assert_eq!(n, 12);
        let reply = Header::decode(hdr_out).unwrap();
        assert_eq!(reply.command, Command::Query);
        assert_eq!(u32::from_le_bytes(rx_out[0..4].try_into().unwrap()), 4);
        assert_eq!(u32::from_le_bytes(rx_out[4..8].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(rx_out[8..12].try_into().unwrap()), 0);
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let bytes = pack_raw(3, 0, 0);
        assert!(matches!(Header::decode(bytes), Err(BridgeError::Proto(_))));
    }

    /// A backend that loops TMS back as TDO (bypass TAP) and answers
    /// queries with a fixed device profile.
    struct LoopbackBackend {
        word_size: usize,
        max_vector_bytes: usize,
    }

    impl JtagBackend for LoopbackBackend {
        fn word_size(&self) -> usize {
            self.word_size
        }
        fn max_vector_bytes(&self) -> usize {
            self.max_vector_bytes
        }
        fn xfer(
            &mut self,
            tx: &[u8],
            hdr_out: &mut [u8; 4],
            rx_out: &mut [u8],
        ) -> Result<usize, BridgeError> {
            let hdr = Header::decode(tx[0..4].try_into().unwrap())?;
            *hdr_out = hdr.encode();
            match hdr.command {
                Command::Query => {
                    rx_out[0..4].copy_from_slice(&(self.word_size as u32).to_le_bytes());
                    rx_out[4..8].copy_from_slice(&0u32.to_le_bytes());
                    rx_out[8..12].copy_from_slice(&50u32.to_le_bytes());
                    Ok(12)
                }
                Command::Shift => {
                    let nbytes = hdr.length.div_ceil(8) as usize;
                    let tms = &tx[4..4 + nbytes];
                    rx_out[..nbytes].copy_from_slice(tms);
                    Ok(nbytes)
                }
            }
        }
    }

    #[test]
    fn send_vectors_is_idempotent_for_a_stateless_tap() {
        let stream = AxisToJtag::new(LoopbackBackend {
            word_size: 4,
            max_vector_bytes: 0,
        });
        let tms = [0x1fu8, 0x00, 0x00];
        let tdi = [0u8; 3];
        let mut out1 = [0u8; 3];
        let mut out2 = [0u8; 3];
        stream.send_vectors(24, &tms, &tdi, &mut out1).unwrap();
        stream.send_vectors(24, &tms, &tdi, &mut out2).unwrap();
        assert_eq!(out1, out2);
        assert_eq!(out1, tms);
    }

    #[test]
    fn set_tck_echoes_device_reported_period() {
        let stream = AxisToJtag::new(LoopbackBackend {
            word_size: 4,
            max_vector_bytes: 0,
        });
        assert_eq!(stream.set_period_ns(40), 50);
    }

    /// Fails `TimeoutErr` on the first few attempts, then succeeds --
    /// scenario 6 of spec.md §8.
    struct FlakyBackend {
        attempts: AtomicU32,
        succeed_on: u32,
    }

    impl JtagBackend for FlakyBackend {
        fn word_size(&self) -> usize {
            4
        }
        fn max_vector_bytes(&self) -> usize {
            0
        }
        fn xfer(
            &mut self,
            tx: &[u8],
            hdr_out: &mut [u8; 4],
            rx_out: &mut [u8],
        ) -> Result<usize, BridgeError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.succeed_on {
                return Err(BridgeError::Timeout);
            }
            let hdr = Header::decode(tx[0..4].try_into().unwrap())?;
            *hdr_out = hdr.encode();
            let nbytes = hdr.length.div_ceil(8) as usize;
            rx_out[..nbytes].copy_from_slice(&tx[4..4 + nbytes]);
            Ok(nbytes)
        }
    }

    #[test]
    fn retries_timeouts_before_promoting_failure() {
        let stream = AxisToJtag::new(FlakyBackend {
            attempts: AtomicU32::new(0),
            succeed_on: 4,
        });
        let tms = [0xaau8];
        let tdi = [0x55u8];
        let mut out = [0u8; 1];
        stream.send_vectors(8, &tms, &tdi, &mut out).unwrap();
        assert_eq!(out, tms);
    }

    #[test]
    fn jtag_driver_splits_oversized_shift_into_chunks() {
        use xvc_server::XvcServer;

        let driver = JtagDriver::new(LoopbackBackend {
            word_size: 4,
            max_vector_bytes: 2,
        });
        let tms: Box<[u8]> = vec![0xaau8; 10].into_boxed_slice();
        let tdi: Box<[u8]> = vec![0x55u8; 10].into_boxed_slice();
        let tdo = driver.shift(80, tms.clone(), tdi);
        assert_eq!(&tdo[..], &tms[..]);
    }

    #[test]
    fn exhausting_retries_promotes_timeout() {
        let stream = AxisToJtag::new(FlakyBackend {
            attempts: AtomicU32::new(0),
            succeed_on: 100,
        });
        let tms = [0xaau8];
        let tdi = [0x55u8];
        let mut out = [0u8; 1];
        match stream.send_vectors(8, &tms, &tdi, &mut out) {
            Err(BridgeError::Timeout) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
    }
}
