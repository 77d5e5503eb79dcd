//! Ogg page framing
//!
//! Only what packet extraction needs: the capture pattern, the header
//! flags and the lacing table. CRCs are not verified; the transport is
//! reliable and the server forwards pages byte-for-byte from the file.

use std::ops::Range;

use crate::error::CodecError;

/// Every page starts with this
pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";

/// Fixed header length before the lacing table
pub const HEADER_LEN: usize = 27;

const FLAG_CONTINUED: u8 = 0x01;

/// A parsed page borrowing the raw bytes
#[derive(Debug)]
pub struct OggPage<'a> {
    data: &'a [u8],
    /// Byte ranges of packets that begin and end on this page
    packets: Vec<Range<usize>>,
    /// Tail of a packet begun on an earlier page
    continuation: Option<Range<usize>>,
    /// Head of a packet finished on a later page
    partial: Option<Range<usize>>,
}

impl<'a> OggPage<'a> {
    /// Parse one page from the start of `data`
    pub fn parse(data: &'a [u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_LEN {
            return Err(CodecError::InvalidPage(format!("{} bytes is shorter than a page header", data.len())));
        }
        if &data[..4] != CAPTURE_PATTERN {
            return Err(CodecError::InvalidPage("missing OggS capture pattern".to_string()));
        }

        let header_type = data[5];
        let segment_count = data[26] as usize;
        let body_start = HEADER_LEN + segment_count;
        if data.len() < body_start {
            return Err(CodecError::InvalidPage("truncated lacing table".to_string()));
        }
        let lacing = &data[HEADER_LEN..body_start];
        let body_len: usize = lacing.iter().map(|&v| v as usize).sum();
        if data.len() < body_start + body_len {
            return Err(CodecError::InvalidPage(format!(
                "body needs {} bytes, page has {}",
                body_len,
                data.len() - body_start
            )));
        }

        let mut packets = Vec::new();
        let mut continuation = None;
        let mut start = body_start;
        let mut end = body_start;
        let mut first = true;

        for &value in lacing {
            end += value as usize;
            if value < 255 {
                if first && header_type & FLAG_CONTINUED != 0 {
                    continuation = Some(start..end);
                } else {
                    packets.push(start..end);
                }
                first = false;
                start = end;
            }
        }

        // A lacing run ending in 255 continues on the next page
        let partial = (start < end).then_some(start..end);

        Ok(Self {
            data,
            packets,
            continuation,
            partial,
        })
    }

    /// Complete packets on this page, in order
    pub fn packets(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        let data = self.data;
        self.packets.iter().map(move |r| &data[r.clone()])
    }

    pub fn continuation(&self) -> Option<&'a [u8]> {
        self.continuation.clone().map(|r| &self.data[r])
    }

    pub fn partial(&self) -> Option<&'a [u8]> {
        self.partial.clone().map(|r| &self.data[r])
    }
}
