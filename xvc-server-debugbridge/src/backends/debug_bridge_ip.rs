//! AXI Debug Bridge IP back end (component D).
//!
//! Grounded on `xvcDrvAxiDbgBridgeIP.cc`/`.h`: five fixed 32-bit
//! registers (length, TMS vector, TDI vector, TDO vector, control/status)
//! and a run bit the firmware clears once the shift completes.
use std::sync::Mutex;

use crate::error::BridgeError;
use crate::mmio::MemMap;
use crate::poll::PollCalibrator;
use crate::stream::JtagBackend;

const LENGTH_IDX: u32 = 0;
const TMSVEC_IDX: u32 = 1;
const TDIVEC_IDX: u32 = 2;
const TDOVEC_IDX: u32 = 3;
const CSR_IDX: u32 = 4;

const CSR_RUN: u32 = 1 << 0;

const WORD_SIZE: usize = 4;
/// The IP only has single-word TMS/TDI/TDO registers: one shift call
/// covers at most 32 bits.
const MAX_VECTOR_BYTES: usize = WORD_SIZE;

pub struct DebugBridgeIpDriver {
    mmio: MemMap,
    poll: Mutex<PollCalibrator>,
}

impl DebugBridgeIpDriver {
    pub fn new(target: &str) -> Result<DebugBridgeIpDriver, BridgeError> {
        let mmio = MemMap::open(target, 0x20)?;
        Ok(DebugBridgeIpDriver {
            mmio,
            poll: Mutex::new(PollCalibrator::new()),
        })
    }

    pub fn usage() {
        println!("debug-bridge-ip <mmio-target>[:offset]    AXI Debug Bridge IP, 32-bit vectors only");
    }
}

impl JtagBackend for DebugBridgeIpDriver {
    fn word_size(&self) -> usize {
        WORD_SIZE
    }

    fn max_vector_bytes(&self) -> usize {
        MAX_VECTOR_BYTES
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
        if payload.len() < 2 * nbytes.div_ceil(WORD_SIZE) * WORD_SIZE {
            return Err(BridgeError::Proto("short shift payload".into()));
        }
        let (tms, tdi) = payload.split_at(payload.len() / 2);

        let mut tms_word = [0u8; 4];
        tms_word[..nbytes].copy_from_slice(&tms[..nbytes]);
        let mut tdi_word = [0u8; 4];
        tdi_word[..nbytes].copy_from_slice(&tdi[..nbytes]);

        self.mmio.wr(LENGTH_IDX, bits);
        self.mmio.wr(TMSVEC_IDX, u32::from_le_bytes(tms_word));
        self.mmio.wr(TDIVEC_IDX, u32::from_le_bytes(tdi_word));
        self.mmio.wr(CSR_IDX, CSR_RUN);

        let mut timed_out = false;
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
        let mmio = &self.mmio;
        self.poll.lock().unwrap().wait_until(|| {
            if std::time::Instant::now() > deadline {
                timed_out = true;
                return true;
            }
            (mmio.rd(CSR_IDX) & CSR_RUN) == 0
        });
        if timed_out {
            return Err(BridgeError::Timeout);
        }

        let tdo_word = self.mmio.rd(TDOVEC_IDX).to_le_bytes();
        hdr_out.copy_from_slice(header);
        let n = nbytes.min(rx_out.len());
        rx_out[..n].copy_from_slice(&tdo_word[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_command_is_answered_without_touching_hardware() {
        let mut hdr_out = [0u8; 4];
        let mut rx_out = [0u8; 16];
        let n = crate::stream::mk_query_reply(WORD_SIZE as u32, 0, 0, &mut hdr_out, &mut rx_out);
        assert_eq!(n, 12);
        let reply = crate::stream::Header::decode(hdr_out).unwrap();
        assert_eq!(reply.command, crate::stream::Command::Query);
        assert_eq!(
            u32::from_le_bytes(rx_out[0..4].try_into().unwrap()),
            WORD_SIZE as u32
        );
    }
}
