// GT1 program file format.
//
// A GT1 file is a stream of load segments followed by an end marker:
//   [addrHi][addrLo][size][data...]*  0x00 [startHi][startLo]
// A size byte of zero means 256 bytes. A start address of zero means
// "no entry point": the program only patches memory.

use std::error::Error;
use std::path::Path;

/// One contiguous chunk of program bytes with its load address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gt1Segment {
    pub address: u16,
    pub data: Vec<u8>,
}

/// A parsed GT1 program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gt1Program {
    pub segments: Vec<Gt1Segment>,
    pub start_address: u16,
    pub has_start_address: bool,
}

impl Gt1Program {
    /// Parse a GT1 image. Returns `None` for malformed input: a header
    /// shorter than one segment, segment data running past the end of the
    /// file, a truncated start-address trailer, or no segments at all.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 3 {
            return None;
        }

        let mut segments = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            // A zero high address byte past the start is the end marker.
            if data[offset] == 0x00 && offset > 0 {
                break;
            }
            if offset + 3 > data.len() {
                return None;
            }
            let address = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let size = match data[offset + 2] {
                0 => 256,
                n => n as usize,
            };
            offset += 3;
            if offset + size > data.len() {
                return None;
            }
            segments.push(Gt1Segment {
                address,
                data: data[offset..offset + size].to_vec(),
            });
            offset += size;
        }

        if segments.is_empty() {
            return None;
        }

        let mut start_address = 0;
        let mut has_start_address = false;
        if offset < data.len() && data[offset] == 0x00 {
            offset += 1;
            if offset + 2 > data.len() {
                return None;
            }
            start_address = u16::from_be_bytes([data[offset], data[offset + 1]]);
            has_start_address = start_address != 0;
        }

        Some(Self {
            segments,
            start_address,
            has_start_address,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let data = std::fs::read(path)?;
        Self::parse(&data).ok_or_else(|| "malformed GT1 file".into())
    }

    /// Serialize back to the wire format. Inverse of [`Gt1Program::parse`]
    /// for any program this crate produces.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_bytes() + self.segments.len() * 3 + 3);
        for segment in &self.segments {
            debug_assert!(!segment.data.is_empty() && segment.data.len() <= 256);
            let [hi, lo] = segment.address.to_be_bytes();
            out.push(hi);
            out.push(lo);
            out.push(if segment.data.len() == 256 {
                0
            } else {
                segment.data.len() as u8
            });
            out.extend_from_slice(&segment.data);
        }
        out.push(0x00);
        let start = if self.has_start_address {
            self.start_address
        } else {
            0
        };
        let [hi, lo] = start.to_be_bytes();
        out.push(hi);
        out.push(lo);
        out
    }

    /// Payload byte count across all segments (headers excluded).
    pub fn total_bytes(&self) -> usize {
        self.segments.iter().map(|s| s.data.len()).sum()
    }
}
