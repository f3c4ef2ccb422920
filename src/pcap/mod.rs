//! Packet dumps in text2pcap format.
//!
//! Each RTP/RTCP packet is hex-dumped with a fake Ethernet/IP/UDP preamble,
//! one file per handle, so `text2pcap -D -n` can turn the capture into a
//! pcap for Wireshark. Dumps happen synchronously on the media path (before
//! encryption on the way out, after decryption on the way in), so enabling
//! them costs latency; they are strictly a debugging aid.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

/// Direction marker in the dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcapDirection {
    Incoming,
    Outgoing,
}

/// A text2pcap capture sink for one handle.
pub struct PcapSink {
    writer: Mutex<BufWriter<File>>,
}

impl PcapSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Dump one packet. `truncate` bounds the payload bytes written (0 means
    /// everything).
    pub fn dump(&self, direction: PcapDirection, packet: &[u8], truncate: usize) {
        let len = if truncate > 0 {
            packet.len().min(truncate)
        } else {
            packet.len()
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let marker = match direction {
            PcapDirection::Incoming => 'I',
            PcapDirection::Outgoing => 'O',
        };

        let mut out = String::new();
        out.push_str(&format!(
            "{} {}.{:06}\n",
            marker,
            now.as_secs(),
            now.subsec_micros()
        ));

        // Fake Ethernet + IPv4 + UDP headers so text2pcap produces frames
        // Wireshark will dissect as RTP.
        let udp_len = 8 + len;
        let ip_len = 20 + udp_len;
        let mut frame = Vec::with_capacity(14 + ip_len);
        frame.extend_from_slice(&[0u8; 12]); // MACs
        frame.extend_from_slice(&[0x08, 0x00]); // IPv4 ethertype
        frame.extend_from_slice(&[0x45, 0x00]);
        frame.extend_from_slice(&(ip_len as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0, 64, 17, 0, 0]); // id/frag/ttl/proto=UDP/csum
        frame.extend_from_slice(&[127, 0, 0, 1, 127, 0, 0, 2]); // src/dst
        frame.extend_from_slice(&5002u16.to_be_bytes()); // src port
        frame.extend_from_slice(&5004u16.to_be_bytes()); // dst port
        frame.extend_from_slice(&(udp_len as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0]); // UDP csum
        frame.extend_from_slice(&packet[..len]);

        for (i, chunk) in frame.chunks(16).enumerate() {
            out.push_str(&format!("{:06x} ", i * 16));
            for byte in chunk {
                out.push_str(&format!("{byte:02x} "));
            }
            out.push('\n');
        }
        out.push('\n');

        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.write_all(out.as_bytes());
        }
    }
}

impl Drop for PcapSink {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn writes_hex_lines_with_offsets() {
        let dir = std::env::temp_dir().join("rtcgate-pcap-test");
        let _ = fs::create_dir_all(&dir);
        let path = dir.join(format!("dump-{}.txt", std::process::id()));

        {
            let sink = PcapSink::create(&path).unwrap();
            sink.dump(PcapDirection::Incoming, &[0x80, 0x60, 0x00, 0x01], 0);
            sink.dump(PcapDirection::Outgoing, &[0x90; 40], 16);
        }

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with('I'));
        assert!(content.contains("\nO "));
        assert!(content.contains("000000 "));
        assert!(content.contains("000010 "));
        let _ = fs::remove_file(&path);
    }
}
