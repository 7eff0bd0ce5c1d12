//! SerDes-backed driver with a bit-bang fallback (component D).
//!
//! Grounded on `xvcDrvSerDesTmem.cc`/`.h`: a CSR with a run bit, a busy
//! bit and a shift-length field, paired TMS/TDI/TDO vector registers, and
//! (when the SerDes block isn't present) a bit-bang path that toggles
//! TCK/TMS/TDI directly and samples TDO with microsecond-scale sleeps.
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::error::BridgeError;
use crate::mmio::MemMap;
use crate::poll::PollCalibrator;
use crate::stream::JtagBackend;

const SDES_TMS_IDX: u32 = 0;
const SDES_TDI_IDX: u32 = 1;
const SDES_CSR_IDX: u32 = 2;
const SDES_TDO_IDX: u32 = 3;
/// Bit-bang control register: bit0 TCK, bit1 TMS, bit2 TDI (write); bit3
/// TDO (read).
const SDES_BB_IDX: u32 = 4;

const CSR_RUN: u32 = 1 << 0;
const CSR_BSY: u32 = 1 << 1;
const CSR_LENS_SHIFT: u32 = 4;
const CSR_LENS_MASK: u32 = 0x0fff << CSR_LENS_SHIFT;

const BB_TCK: u32 = 1 << 0;
const BB_TMS: u32 = 1 << 1;
const BB_TDI: u32 = 1 << 2;
const BB_TDO: u32 = 1 << 3;

const WORD_SIZE: usize = 4;
const MAX_VECTOR_BYTES: usize = WORD_SIZE;
const BIT_BANG_DELAY: Duration = Duration::from_micros(1);

/// CSR value to kick off a `bits`-long hardware shift. The LENS field
/// encodes `bits - 1`, matching `xvcDrvSerDesTmem.cc`'s `(l - 1) <<
/// SDES_CSR_LENS`.
fn lens_csr_value(bits: u32) -> u32 {
    (((bits - 1) << CSR_LENS_SHIFT) & CSR_LENS_MASK) | CSR_RUN
}

/// The SerDes engine left-justifies the captured TDO bits in the 32-bit
/// register; right-justify them the way `xvcDrvSerDesTmem.cc` does with
/// `w >>= (32 - l)`.
fn right_justify_tdo(word: u32, bits: u32) -> u32 {
    word >> (32 - bits)
}

pub struct SerDesDriver {
    mmio: MemMap,
    poll: Mutex<PollCalibrator>,
    bit_bang: bool,
    log_bscan: bool,
}

impl SerDesDriver {
    pub fn new(target: &str, bit_bang: bool, log_bscan: bool) -> Result<SerDesDriver, BridgeError> {
        let mmio = MemMap::open(target, 0x20)?;
        Ok(SerDesDriver {
            mmio,
            poll: Mutex::new(PollCalibrator::new()),
            bit_bang,
            log_bscan,
        })
    }

    pub fn usage() {
        println!("serdes <mmio-target>[:offset]    SerDes shift engine");
        println!("    -b                           force the bit-bang fallback path");
        println!("    -l                           log every BSCAN register sample");
    }

    fn bit_bang_one(&self, tms: bool, tdi: bool) -> bool {
        let mut word = 0u32;
        if tms {
            word |= BB_TMS;
        }
        if tdi {
            word |= BB_TDI;
        }
        self.mmio.wr(SDES_BB_IDX, word);
        thread::sleep(BIT_BANG_DELAY);
        self.mmio.wr(SDES_BB_IDX, word | BB_TCK);
        thread::sleep(BIT_BANG_DELAY);
        let sample = self.mmio.rd(SDES_BB_IDX) & BB_TDO != 0;
        self.mmio.wr(SDES_BB_IDX, word);
        thread::sleep(BIT_BANG_DELAY);
        if self.log_bscan {
            log::debug!("bscan sample: tms={tms} tdi={tdi} tdo={sample}");
        }
        sample
    }

    fn xfer_bit_bang(&self, bits: u32, tms: &[u8], tdi: &[u8], tdo_out: &mut [u8]) {
        for bit in 0..bits as usize {
            let byte = bit / 8;
            let mask = 1u8 << (bit % 8);
            let tms_bit = tms[byte] & mask != 0;
            let tdi_bit = tdi[byte] & mask != 0;
            let tdo_bit = self.bit_bang_one(tms_bit, tdi_bit);
            if tdo_bit {
                tdo_out[byte] |= mask;
            } else {
                tdo_out[byte] &= !mask;
            }
        }
    }

    fn xfer_hardware(&self, bits: u32, nbytes: usize, tms: &[u8], tdi: &[u8]) -> Result<[u8; 4], BridgeError> {
        debug_assert!((1..=32).contains(&bits), "hardware path covers 1..=32 bits");
        let mut tms_word = [0u8; 4];
        tms_word[..nbytes].copy_from_slice(&tms[..nbytes]);
        let mut tdi_word = [0u8; 4];
        tdi_word[..nbytes].copy_from_slice(&tdi[..nbytes]);

        self.mmio.wr(SDES_TMS_IDX, u32::from_le_bytes(tms_word));
        self.mmio.wr(SDES_TDI_IDX, u32::from_le_bytes(tdi_word));
        self.mmio.wr(SDES_CSR_IDX, lens_csr_value(bits));

        let mut timed_out = false;
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
        let mmio = &self.mmio;
        self.poll.lock().unwrap().wait_until(|| {
            if std::time::Instant::now() > deadline {
                timed_out = true;
                return true;
            }
            (mmio.rd(SDES_CSR_IDX) & CSR_BSY) == 0
        });
        if timed_out {
            return Err(BridgeError::Timeout);
        }
        let tdo = right_justify_tdo(self.mmio.rd(SDES_TDO_IDX), bits);
        Ok(tdo.to_le_bytes())
    }
}

impl JtagBackend for SerDesDriver {
    fn word_size(&self) -> usize {
        WORD_SIZE
    }

    fn max_vector_bytes(&self) -> usize {
        if self.bit_bang {
            0
        } else {
            MAX_VECTOR_BYTES
        }
    }

    fn xfer(
        &mut self,
        tx: &[u8],
        hdr_out: &mut [u8; 4],
        rx_out: &mut [u8],
    ) -> Result<usize, BridgeError> {
        if tx.len() < 4 {
            return Err(BridgeError::Proto("stream packet too short".into()));
        }
        let header = &tx[0..4];
        let decoded = crate::stream::Header::decode(header.try_into().unwrap())?;

        if decoded.command == crate::stream::Command::Query {
            return Ok(crate::stream::mk_query_reply(
                WORD_SIZE as u32,
                0,
                0,
                hdr_out,
                rx_out,
            ));
        }

        let payload = &tx[4..];
        let bits = decoded.length;
        let nbytes = bits.div_ceil(8) as usize;
        let (tms, tdi) = payload.split_at(payload.len() / 2);

        let n = nbytes.min(rx_out.len());
        if self.bit_bang {
            let mut tdo_buf = vec![0u8; nbytes];
            self.xfer_bit_bang(bits, tms, tdi, &mut tdo_buf);
            rx_out[..n].copy_from_slice(&tdo_buf[..n]);
        } else {
            let tdo_word = self.xfer_hardware(bits, nbytes, tms, tdi)?;
            rx_out[..n].copy_from_slice(&tdo_word[..n]);
        }
        hdr_out.copy_from_slice(header);
        Ok(n)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lens_field_encodes_bits_minus_one() {
        assert_eq!(
            (lens_csr_value(1) & CSR_LENS_MASK) >> CSR_LENS_SHIFT,
            0
        );
        assert_eq!(
            (lens_csr_value(32) & CSR_LENS_MASK) >> CSR_LENS_SHIFT,
            31
        );
        assert_ne!(lens_csr_value(8) & CSR_RUN, 0);
    }

    #[test]
    fn tdo_is_right_justified_for_a_short_shift() {
        // A 4-bit shift leaves the captured nibble in the top 4 bits of
        // the word; right-justifying must bring it down to 0xa.
        assert_eq!(right_justify_tdo(0xa000_0000, 4), 0xa);
    }

    #[test]
    fn tdo_passes_through_unchanged_for_a_full_word_shift() {
        assert_eq!(right_justify_tdo(0xdead_beef, 32), 0xdead_beef);
    }

    #[test]
    fn query_command_is_answered_in_driver_without_touching_hardware() {
        let mut hdr_out = [0u8; 4];
        let mut rx_out = [0u8; 16];
        let n = crate::stream::mk_query_reply(
            WORD_SIZE as u32,
            0,
            0,
            &mut hdr_out,
            &mut rx_out,
        );
        assert_eq!(n, 12);
        let reply = crate::stream::Header::decode(hdr_out).unwrap();
        assert_eq!(reply.command, crate::stream::Command::Query);
        assert_eq!(u32::from_le_bytes(rx_out[0..4].try_into().unwrap()), WORD_SIZE as u32);
    }
}
