//! FIFO streaming back end (component D).
//!
//! Grounded on `xvcDrvAxisTmem.cc`/`xvcDrvAxisFifo.h`: a single 32-bit
//! data register used both to push the outbound `AxisToJtag` packet word
//! by word and to drain the inbound reply, plus a control/status
//! register reporting fill level, capacity and firmware version.
use std::fs::File;
use std::sync::Mutex;

use crate::error::BridgeError;
use crate::mmio::MemMap;
use crate::poll::PollCalibrator;
use crate::stream::JtagBackend;

const FIFO_DAT_IDX: u32 = 0;
const FIFO_CSR_IDX: u32 = 1;

const CSR_RST: u32 = 1 << 0;
const CSR_EOFO: u32 = 1 << 1;
const CSR_EMPI: u32 = 1 << 2;
const CSR_NWRDS_SHIFT: u32 = 8;
const CSR_NWRDS_MASK: u32 = 0xff << CSR_NWRDS_SHIFT;
const CSR_MAXWS_SHIFT: u32 = 16;
const CSR_MAXWS_MASK: u32 = 0xff << CSR_MAXWS_SHIFT;

const WORD_SIZE: usize = 4;

struct Inner {
    mmio: MemMap,
    poll: PollCalibrator,
    irq: Option<File>,
}

pub struct FifoDriver {
    inner: Mutex<Inner>,
    max_vector_bytes: usize,
}

impl FifoDriver {
    pub fn new(target: &str, irq_path: Option<&str>) -> Result<FifoDriver, BridgeError> {
        let mmio = MemMap::open(target, 0x1000)?;
        mmio.wr(FIFO_CSR_IDX, CSR_RST);
        mmio.wr(FIFO_CSR_IDX, 0);

        let csr = mmio.rd(FIFO_CSR_IDX);
        let max_words = ((csr & CSR_MAXWS_MASK) >> CSR_MAXWS_SHIFT).max(1) as usize;
        // One word is spent on the stream header.
        let max_vector_bytes = (max_words.saturating_sub(1)) * WORD_SIZE;

        let irq = match irq_path {
            Some(path) => Some(
                std::fs::OpenOptions::new()
                    .read(true)
                    .open(path)
                    .map_err(BridgeError::from)?,
            ),
            None => None,
        };

        Ok(FifoDriver {
            inner: Mutex::new(Inner {
                mmio,
                poll: PollCalibrator::new(),
                irq,
            }),
            max_vector_bytes,
        })
    }

    pub fn usage() {
        println!("fifo <mmio-target>[:offset]    AXI-Stream FIFO front end");
        println!("    -i <irq-file>               wait for data via this uio irq file instead of polling");
    }
}

impl Inner {
    fn push_words(&self, words: &[u8]) {
        debug_assert_eq!(words.len() % WORD_SIZE, 0);
        let total = words.len() / WORD_SIZE;
        for (i, chunk) in words.chunks_exact(WORD_SIZE).enumerate() {
            let word = u32::from_le_bytes(chunk.try_into().unwrap()).swap_bytes();
            self.mmio.wr(FIFO_DAT_IDX, word);
            if i + 1 == total {
                let csr = self.mmio.rd(FIFO_CSR_IDX);
                self.mmio.wr(FIFO_CSR_IDX, csr | CSR_EOFO);
            }
        }
    }

    fn wait_for_reply(&mut self) -> Result<(), BridgeError> {
        if let Some(irq) = &self.irq {
            use std::io::Read;
            let mut buf = [0u8; 4];
            let mut irq = irq.try_clone().map_err(BridgeError::from)?;
            irq.read_exact(&mut buf).map_err(BridgeError::from)?;
            return Ok(());
        }

        let mmio = &self.mmio;
        let mut timed_out = false;
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
        self.poll.wait_until(|| {
            if std::time::Instant::now() > deadline {
                timed_out = true;
                return true;
            }
            (mmio.rd(FIFO_CSR_IDX) & CSR_EMPI) == 0
        });
        if timed_out {
            return Err(BridgeError::Timeout);
        }
        Ok(())
    }

    /// Drains every word the firmware reports as available, regardless
    /// of how many the caller actually wants -- the FIFO must be emptied
    /// before the next push or the device wedges.
    fn drain_words(&self, out: &mut Vec<u8>) {
        let csr = self.mmio.rd(FIFO_CSR_IDX);
        let available = ((csr & CSR_NWRDS_MASK) >> CSR_NWRDS_SHIFT) as usize;
        for _ in 0..available {
            let word = self.mmio.rd(FIFO_DAT_IDX).swap_bytes();
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
}

impl JtagBackend for FifoDriver {
    fn word_size(&self) -> usize {
        WORD_SIZE
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
        let mut inner = self.inner.lock().unwrap();
        inner.push_words(tx);
        inner.wait_for_reply()?;

        let mut reply = Vec::with_capacity(rx_out.len() + WORD_SIZE);
        inner.drain_words(&mut reply);

        if reply.len() < WORD_SIZE {
            return Err(BridgeError::Proto("short fifo reply header".into()));
        }
        hdr_out.copy_from_slice(&reply[0..WORD_SIZE]);
        let payload = &reply[WORD_SIZE..];
        let n = payload.len().min(rx_out.len());
        rx_out[..n].copy_from_slice(&payload[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn max_vector_bytes_reserves_one_header_word() {
        // max_words=9 => capacity for 8 payload words == 32 bytes.
        let csr = (9u32) << CSR_MAXWS_SHIFT;
        let max_words = ((csr & CSR_MAXWS_MASK) >> CSR_MAXWS_SHIFT).max(1) as usize;
        assert_eq!((max_words - 1) * WORD_SIZE, 32);
    }
}
