//! EEM packet framing.
//!
//! Every EEM packet starts with a little-endian 16-bit header:
//!
//! ```text
//!  15      14      13                                0
//! +-------+-------+-----------------------------------+
//! |bmType | bmCRC |              length               |
//! +-------+-------+-----------------------------------+
//! ```
//!
//! Data packets (`bmType = 0`) carry an Ethernet frame followed by a 4-byte
//! CRC field; `length` covers both. Command packets (`bmType = 1`) reuse the
//! low 14 bits for their own sub-format.

use super::bytes::{Buf, BufMut};
use usb_device::{Result, UsbError};

/// Size of the EEM packet header.
pub const HEADER_LEN: usize = 2;
/// Size of the trailing CRC field of a data packet.
pub const CRC_LEN: usize = 4;
/// Largest Ethernet frame (without FCS) carried in one data packet.
pub const MAX_SEGMENT_SIZE: usize = 1514;
/// Size of the receive and transmit buffers: one maximum size data packet.
pub const FRAME_BUFFER_LEN: usize = HEADER_LEN + MAX_SEGMENT_SIZE + CRC_LEN;
/// Stands in for the Ethernet CRC-32 when `bmCRC` is clear. Receivers must
/// not check it.
pub const SENTINEL_CRC: u32 = 0xDEAD_BEEF;

const LENGTH_MASK: u16 = 0x3FFF;
const CRC_BIT: u16 = 1 << 14;
const TYPE_BIT: u16 = 1 << 15;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PacketType {
    Data,
    Command,
}

/// What the trailing four bytes of a data packet hold.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Crc {
    /// The fixed [`SENTINEL_CRC`] value.
    Sentinel,
    /// A real Ethernet CRC-32.
    Calculated,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub crc: Crc,
    /// Bytes following the header, 14 bits wide.
    pub length: u16,
}

impl PacketHeader {
    /// Header for a data packet carrying `frame_len` bytes of Ethernet frame
    /// followed by the sentinel CRC.
    ///
    /// Returns `None` if the packet length does not fit the 14-bit field.
    #[must_use]
    pub const fn data(frame_len: u16) -> Option<Self> {
        if frame_len > LENGTH_MASK - CRC_LEN as u16 {
            return None;
        }
        Some(Self {
            packet_type: PacketType::Data,
            crc: Crc::Sentinel,
            length: frame_len + CRC_LEN as u16,
        })
    }

    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self {
            packet_type: if bits & TYPE_BIT == 0 {
                PacketType::Data
            } else {
                PacketType::Command
            },
            crc: if bits & CRC_BIT == 0 {
                Crc::Sentinel
            } else {
                Crc::Calculated
            },
            length: bits & LENGTH_MASK,
        }
    }

    #[must_use]
    pub const fn to_bits(self) -> u16 {
        let mut bits = self.length & LENGTH_MASK;
        if let Crc::Calculated = self.crc {
            bits |= CRC_BIT;
        }
        if let PacketType::Command = self.packet_type {
            bits |= TYPE_BIT;
        }
        bits
    }

    pub(crate) fn read(mut data: &[u8]) -> Option<Self> {
        data.get_u16_le().map(Self::from_bits)
    }

    pub(crate) fn write(self, mut buf: &mut [u8]) {
        buf.put_u16_le(self.to_bits());
    }
}

/// A complete class transfer as received from the host, classified.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Packet {
    /// An Ethernet frame of `len` bytes starting right after the header.
    Data { len: usize },
    /// A command packet. Never interpreted.
    Command,
    /// A zero-length data packet, sent by hosts as transfer padding.
    ZeroLength,
}

/// Classifies the first EEM packet of `transfer`.
///
/// Anything after the packet that the header declares is ignored.
pub(crate) fn decode_transfer(transfer: &[u8]) -> Result<Packet> {
    let Some(header) = PacketHeader::read(transfer) else {
        warn!("eem: transfer shorter than packet header {}", transfer.len());
        return Err(UsbError::ParseError);
    };

    if header.packet_type == PacketType::Command {
        debug!("eem: command packet {=u16:#x}", header.to_bits());
        return Ok(Packet::Command);
    }

    let declared = usize::from(header.length);
    if declared == 0 {
        return Ok(Packet::ZeroLength);
    }

    if declared < CRC_LEN {
        warn!("eem: data packet length {} shorter than CRC", declared);
        return Err(UsbError::ParseError);
    }

    if HEADER_LEN + declared > transfer.len() {
        warn!(
            "eem: data packet length {} exceeds transfer {}",
            declared,
            transfer.len()
        );
        return Err(UsbError::ParseError);
    }

    if HEADER_LEN + declared < transfer.len() {
        debug!(
            "eem: ignoring {} bytes after data packet",
            transfer.len() - HEADER_LEN - declared
        );
    }

    Ok(Packet::Data {
        len: declared - CRC_LEN,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_transfer(frame: &[u8]) -> ([u8; FRAME_BUFFER_LEN], usize) {
        let mut transfer = [0u8; FRAME_BUFFER_LEN];
        let len = HEADER_LEN + frame.len() + CRC_LEN;
        PacketHeader::data(u16::try_from(frame.len()).unwrap())
            .unwrap()
            .write(&mut transfer);
        transfer[HEADER_LEN..HEADER_LEN + frame.len()].copy_from_slice(frame);
        transfer[len - CRC_LEN..len].copy_from_slice(&SENTINEL_CRC.to_be_bytes());
        (transfer, len)
    }

    #[test]
    fn header_bit_layout() {
        let header = PacketHeader::from_bits(0x8000 | 0x4000 | 0x0123);
        assert_eq!(header.packet_type, PacketType::Command);
        assert_eq!(header.crc, Crc::Calculated);
        assert_eq!(header.length, 0x0123);

        assert_eq!(PacketHeader::data(46).unwrap().to_bits(), 50);
        assert_eq!(
            PacketHeader::from_bits(0x3FFF),
            PacketHeader {
                packet_type: PacketType::Data,
                crc: Crc::Sentinel,
                length: 0x3FFF,
            }
        );
    }

    #[test]
    fn header_is_little_endian_on_the_wire() {
        let mut buf = [0u8; HEADER_LEN];
        PacketHeader::data(1514).unwrap().write(&mut buf);
        // 1518 = 0x05EE
        assert_eq!(buf, [0xEE, 0x05]);
        assert_eq!(PacketHeader::read(&buf), PacketHeader::data(1514));
    }

    #[test]
    fn data_header_rejects_lengths_beyond_fourteen_bits() {
        assert_eq!(PacketHeader::data(0x3FFB).map(|h| h.length), Some(0x3FFF));
        assert_eq!(PacketHeader::data(0x3FFC), None);
        assert_eq!(PacketHeader::data(u16::MAX), None);
    }

    #[test]
    fn length_is_truncated_to_fourteen_bits() {
        let header = PacketHeader {
            packet_type: PacketType::Data,
            crc: Crc::Sentinel,
            length: 0xFFFF,
        };
        assert_eq!(header.to_bits(), 0x3FFF);
    }

    #[test]
    fn data_packet_strips_header_and_crc() {
        let frame = [0x5Au8; 20];
        let (transfer, len) = data_transfer(&frame);
        assert_eq!(len, 26);
        assert_eq!(
            decode_transfer(&transfer[..len]),
            Ok(Packet::Data { len: 20 })
        );
    }

    #[test]
    fn every_frame_length_is_recovered() {
        for frame_len in [0, 1, 46, 60, 63, 64, 512, 1500, MAX_SEGMENT_SIZE] {
            let frame = [0xA5u8; MAX_SEGMENT_SIZE];
            let (transfer, len) = data_transfer(&frame[..frame_len]);
            assert_eq!(
                decode_transfer(&transfer[..len]),
                Ok(Packet::Data { len: frame_len }),
                "frame length {frame_len}"
            );
        }
    }

    #[test]
    fn command_packets_are_not_interpreted() {
        let mut transfer = [0u8; 10];
        transfer[..2].copy_from_slice(&0x8000u16.to_le_bytes());
        assert_eq!(decode_transfer(&transfer), Ok(Packet::Command));

        // bmCRC and the length bits do not change the classification
        transfer[..2].copy_from_slice(&0xC7FFu16.to_le_bytes());
        assert_eq!(decode_transfer(&transfer), Ok(Packet::Command));
    }

    #[test]
    fn zero_length_padding_packet() {
        assert_eq!(decode_transfer(&[0x00, 0x00]), Ok(Packet::ZeroLength));
    }

    #[test]
    fn trailing_padding_is_ignored() {
        let (mut transfer, len) = data_transfer(&[1, 2, 3]);
        // zero-length EEM packet appended by the host
        transfer[len] = 0;
        transfer[len + 1] = 0;
        assert_eq!(
            decode_transfer(&transfer[..len + 2]),
            Ok(Packet::Data { len: 3 })
        );
    }

    #[test]
    fn malformed_transfers_are_rejected() {
        assert_eq!(decode_transfer(&[]), Err(UsbError::ParseError));
        assert_eq!(decode_transfer(&[0x10]), Err(UsbError::ParseError));
        // declares 3 bytes, less than the CRC field
        assert_eq!(
            decode_transfer(&[0x03, 0x00, 0, 0, 0]),
            Err(UsbError::ParseError)
        );
        // declares 24 bytes but only 10 arrived
        let mut transfer = [0u8; 12];
        transfer[..2].copy_from_slice(&24u16.to_le_bytes());
        assert_eq!(decode_transfer(&transfer), Err(UsbError::ParseError));
    }
}
