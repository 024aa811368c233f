use core::sync::atomic::{AtomicBool, Ordering};

use super::buffer::RWBuffer;
use super::bytes::BufMut;
use super::chain::BufferChain;
use super::descriptor::{EemDescriptors, MAX_PACKET_SIZE};
use super::packet::{
    decode_transfer, Packet, PacketHeader, CRC_LEN, FRAME_BUFFER_LEN, HEADER_LEN,
    MAX_SEGMENT_SIZE, SENTINEL_CRC,
};
use smoltcp::phy::{self, Device, DeviceCapabilities, Medium};
#[allow(clippy::wildcard_imports)]
use usb_device::class_prelude::*;
use usb_device::prelude::UsbDeviceState;
use usb_device::Result;

/*
 * References:
 *   - Universal Serial Bus Communications Class Subclass Specification for
 *     Ethernet Emulation Model Devices - Revision 1.0 - February 2, 2005
 *   - Universal Serial Bus Class Definitions for Communications Devices - Revision
 *     1.2 (Errata 1) - November 3, 2010
 */

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DeviceState {
    /// No configuration is active; nothing is received or sent.
    Unconfigured,
    Configured,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum ReceiveState {
    /// Link down, the OUT endpoint is not read.
    Idle,
    /// Accepting OUT packets into the receive buffer.
    Armed,
    /// Dropping the rest of a transfer that did not fit the receive buffer.
    Discarding,
    /// A frame of `len` bytes is waiting for the consumer. OUT packets stay in
    /// the endpoint until it is consumed.
    Holding { len: usize },
}

/// CDC-EEM function: one data interface with a bulk endpoint pair carrying
/// Ethernet frames.
///
/// At most one transfer is in flight per direction. The receive buffer holds
/// one frame until it is consumed and the transmit buffer holds one frame
/// until the host has read all of it.
pub struct Eem<'a, B: UsbBus> {
    data_if: InterfaceNumber,
    state: DeviceState,
    eem_in: EemIn<'a, B>,
    eem_out: EemOut<'a, B>,
}

struct EemIn<'a, B: UsbBus> {
    write_ep: EndpointIn<'a, B>,
    buffer: RWBuffer<'a, FRAME_BUFFER_LEN>,
    /// Transmit-readiness gate: set while no transfer is in flight.
    ready: AtomicBool,
    /// The bus refused the last packet, retry from `poll`.
    write_pending: bool,
}

struct EemOut<'a, B: UsbBus> {
    read_ep: EndpointOut<'a, B>,
    buffer: RWBuffer<'a, FRAME_BUFFER_LEN>,
    state: ReceiveState,
}

impl<'a, B: UsbBus> Eem<'a, B> {
    pub fn new(
        alloc: &'a UsbBusAllocator<B>,
        in_buffer: &'a mut [u8; FRAME_BUFFER_LEN],
        out_buffer: &'a mut [u8; FRAME_BUFFER_LEN],
    ) -> Self {
        Self {
            data_if: alloc.interface(),
            state: DeviceState::Unconfigured,
            eem_out: EemOut {
                read_ep: alloc.bulk(MAX_PACKET_SIZE),
                buffer: RWBuffer::new(out_buffer),
                state: ReceiveState::Idle,
            },
            eem_in: EemIn {
                write_ep: alloc.bulk(MAX_PACKET_SIZE),
                buffer: RWBuffer::new(in_buffer),
                ready: AtomicBool::new(false),
                write_pending: false,
            },
        }
    }

    /// Brings the link up after the host selected a configuration.
    ///
    /// Arms a receive for a full buffer and opens the transmit gate, whatever
    /// was in flight before.
    pub fn configure(&mut self) {
        info!("eem: configured");
        self.state = DeviceState::Configured;
        self.eem_out.arm();
        self.eem_in.open();
    }

    /// Follows the state of the `UsbDevice`: configures the link when the
    /// device becomes configured and takes it down when the device falls back
    /// to the default or addressed state.
    ///
    /// Call this after every `UsbDevice::poll`.
    pub fn update_device_state(&mut self, device_state: UsbDeviceState) {
        match (device_state, self.state) {
            (UsbDeviceState::Configured, DeviceState::Unconfigured) => self.configure(),
            (UsbDeviceState::Default | UsbDeviceState::Addressed, DeviceState::Configured) => {
                self.link_down();
            }
            _ => {}
        }
    }

    fn link_down(&mut self) {
        info!("eem: link down");
        self.state = DeviceState::Unconfigured;
        self.eem_out.close();
        self.eem_in.close();
    }

    /// Makes the receive buffer available for the next transfer. A frame that
    /// has not been consumed yet is dropped.
    ///
    /// Does nothing while the link is down.
    pub fn arm_receive(&mut self) {
        if self.state == DeviceState::Configured {
            self.eem_out.arm();
        } else {
            debug!("eem: link down, receive not armed");
        }
    }

    /// Whether [`xmit_packet`](Self::xmit_packet) would accept a frame.
    #[must_use]
    pub fn can_xmit(&self) -> bool {
        self.eem_in.can_write()
    }

    /// Whether a received frame is waiting for [`read_frame`](Self::read_frame).
    #[must_use]
    pub fn can_read(&self) -> bool {
        self.eem_out.frame_len().is_some()
    }

    /// Sends one Ethernet frame.
    ///
    /// Returns `WouldBlock` while the previous frame is still being sent,
    /// `BufferOverflow` if the frame is longer than [`MAX_SEGMENT_SIZE`] and
    /// `InvalidState` while the link is down. The transmit buffer is left
    /// untouched in all three cases.
    ///
    /// Any other error comes from the bus while writing the first packet; the
    /// frame has been dropped and the gate is open again.
    pub fn xmit_packet<C: BufferChain + ?Sized>(&mut self, chain: &C) -> Result<()> {
        self.link_up()?;
        self.eem_in.write_chain(chain)
    }

    /// Sends one Ethernet frame of `len` bytes, written in place by `f`.
    pub fn xmit_with<R, F>(&mut self, len: usize, f: F) -> Result<R>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        self.link_up()?;
        self.eem_in.write_frame(len, f)
    }

    /// Hands the received frame to `f` and re-arms the receive once `f`
    /// returns.
    pub fn read_frame<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        self.eem_out.read_frame(f)
    }

    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    fn link_up(&self) -> Result<()> {
        if self.state == DeviceState::Configured {
            Ok(())
        } else {
            warn!("eem: can't send while unconfigured");
            Err(UsbError::InvalidState)
        }
    }
}

impl<'a, B: UsbBus> EemIn<'a, B> {
    fn can_write(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn write_chain<C: BufferChain + ?Sized>(&mut self, chain: &C) -> Result<()> {
        self.send(chain.total_len(), |buffer| {
            let mut frame_len = 0;
            for segment in chain.segments() {
                buffer.write(segment.len(), |mut buf| {
                    buf.put_slice(segment);
                    Ok((segment.len(), ()))
                })?;
                frame_len += segment.len();
            }
            Ok((frame_len, ()))
        })
    }

    fn write_frame<R, F>(&mut self, len: usize, f: F) -> Result<R>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        self.send(len, |buffer| buffer.write(len, |buf| Ok((len, f(buf)))))
    }

    fn prepare_frame<R, F>(&mut self, len: usize, f: F) -> Result<R>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        self.prepare(len, |buffer| buffer.write(len, |buf| Ok((len, f(buf)))))
    }

    /// Assembles a data packet around the frame written by `fill` and starts
    /// sending it. A frame dropped by a bus error is reported.
    fn send<R>(
        &mut self,
        frame_len: usize,
        fill: impl FnOnce(&mut RWBuffer<'a, FRAME_BUFFER_LEN>) -> Result<(usize, R)>,
    ) -> Result<R> {
        let result = self.prepare(frame_len, fill)?;
        self.start()?;
        Ok(result)
    }

    /// Assembles a data packet around the frame written by `fill` and closes
    /// the gate.
    fn prepare<R>(
        &mut self,
        frame_len: usize,
        fill: impl FnOnce(&mut RWBuffer<'a, FRAME_BUFFER_LEN>) -> Result<(usize, R)>,
    ) -> Result<R> {
        if !self.can_write() {
            return Err(UsbError::WouldBlock);
        }

        if frame_len > MAX_SEGMENT_SIZE {
            warn!(
                "eem: frame of {} bytes exceeds max segment size",
                frame_len
            );
            return Err(UsbError::BufferOverflow);
        }

        let result = match Self::assemble(&mut self.buffer, fill) {
            Ok(result) => result,
            Err(e) => {
                self.buffer.clear();
                return Err(e);
            }
        };

        self.ready.store(false, Ordering::Release);
        debug!("eem: sending {} bytes", self.buffer.unread());
        Ok(result)
    }

    /// Writes the first packet of a prepared transfer. A packet the bus
    /// refused is retried from poll, any other bus error has dropped the
    /// frame.
    fn start(&mut self) -> Result<()> {
        match self.write_packet() {
            Ok(()) | Err(UsbError::WouldBlock) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn assemble<R>(
        buffer: &mut RWBuffer<'a, FRAME_BUFFER_LEN>,
        fill: impl FnOnce(&mut RWBuffer<'a, FRAME_BUFFER_LEN>) -> Result<(usize, R)>,
    ) -> Result<R> {
        buffer.clear();

        // the header is filled in last
        buffer.write(HEADER_LEN, |_| Ok((HEADER_LEN, ())))?;

        let (frame_len, result) = fill(buffer)?;
        if frame_len > MAX_SEGMENT_SIZE {
            warn!("eem: chain longer than its total length");
            return Err(UsbError::BufferOverflow);
        }

        buffer.write(CRC_LEN, |mut buf| {
            buf.put_u32_be(SENTINEL_CRC);
            Ok((CRC_LEN, ()))
        })?;

        let Some(header) = u16::try_from(frame_len)
            .ok()
            .and_then(PacketHeader::data)
        else {
            return Err(UsbError::BufferOverflow);
        };
        header.write(buffer.written_mut());

        Ok(result)
    }

    /// Writes the next packet of the transfer in the buffer: a full packet, a
    /// short final packet, or a zero length packet after a full final packet.
    fn write_packet(&mut self) -> Result<()> {
        let max_packet_size = usize::from(self.write_ep.max_packet_size());
        self.write_pending = false;

        let result = if self.buffer.is_empty() {
            // No data to send
            return Ok(());
        } else if !self.buffer.has_unread() {
            // Zero length packet
            self.write_ep.write(&[]).map(|_| self.buffer.clear())
        } else {
            let len = self.buffer.unread().min(max_packet_size);
            self.buffer
                .read(len, |data| self.write_ep.write(data).map(|written| (written, ())))
                .map(|_| {
                    if len < max_packet_size {
                        // Short packet, transfer complete
                        self.buffer.clear();
                    }
                })
        };

        match result {
            Ok(()) => Ok(()),
            Err(UsbError::WouldBlock) => {
                self.write_pending = true;
                Err(UsbError::WouldBlock)
            }
            Err(e) => {
                error!("eem: failed to write packet, frame dropped {}", e);
                self.open();
                Err(e)
            }
        }
    }

    /// An IN packet of the current transfer was read by the host.
    fn packet_complete(&mut self) {
        if self.buffer.is_empty() {
            debug!("eem: send complete");
            self.ready.store(true, Ordering::Release);
        } else {
            let _: Result<()> = self.write_packet();
        }
    }

    /// Drops any transfer in progress and opens the gate.
    fn open(&mut self) {
        self.buffer.clear();
        self.write_pending = false;
        self.ready.store(true, Ordering::Release);
    }

    fn close(&mut self) {
        self.buffer.clear();
        self.write_pending = false;
        self.ready.store(false, Ordering::Release);
    }
}

impl<'a, B: UsbBus> EemOut<'a, B> {
    fn frame_len(&self) -> Option<usize> {
        match self.state {
            ReceiveState::Holding { len } => Some(len),
            _ => None,
        }
    }

    fn arm(&mut self) {
        self.buffer.clear();
        self.state = ReceiveState::Armed;
    }

    fn close(&mut self) {
        self.buffer.clear();
        self.state = ReceiveState::Idle;
    }

    fn read_frame<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let Some(len) = self.frame_len() else {
            return Err(UsbError::WouldBlock);
        };

        let result = self
            .buffer
            .written_mut()
            .get_mut(HEADER_LEN..HEADER_LEN + len)
            .map(f);

        // the consumer is done with the buffer
        self.arm();
        result.ok_or(UsbError::InvalidState)
    }

    /// Reads a single packet from the OUT endpoint, and decodes the transfer
    /// once its last packet has arrived.
    fn read_packet(&mut self) -> Result<()> {
        match self.state {
            ReceiveState::Armed => {}
            ReceiveState::Discarding => return self.discard_packet(),
            ReceiveState::Idle | ReceiveState::Holding { .. } => {
                return Err(UsbError::WouldBlock);
            }
        }

        let max_packet_size = usize::from(self.read_ep.max_packet_size());
        let len = max_packet_size.min(self.buffer.remaining());

        let read = match self
            .buffer
            .write(len, |data| Ok((self.read_ep.read(data)?, ())))
        {
            Ok((read, ())) => read,
            Err(UsbError::WouldBlock) => return Err(UsbError::WouldBlock),
            Err(e) => {
                warn!("eem: transfer does not fit receive buffer {}", e);
                self.buffer.clear();
                self.state = ReceiveState::Discarding;
                return Err(e);
            }
        };

        if read == max_packet_size {
            // more packets to come
            return Ok(());
        }

        match decode_transfer(self.buffer.written()) {
            Ok(Packet::Data { len }) => {
                debug!("eem: received frame of {} bytes", len);
                self.state = ReceiveState::Holding { len };
                Ok(())
            }
            Ok(Packet::Command) => {
                debug!("eem: command packet discarded");
                self.arm();
                Ok(())
            }
            Ok(Packet::ZeroLength) => {
                self.arm();
                Ok(())
            }
            Err(e) => {
                self.arm();
                Err(e)
            }
        }
    }

    fn discard_packet(&mut self) -> Result<()> {
        let mut scratch = [0u8; MAX_PACKET_SIZE as usize];
        let read = self.read_ep.read(&mut scratch)?;
        if read < scratch.len() {
            debug!("eem: oversized transfer dropped");
            self.arm();
        }
        Ok(())
    }
}

impl<B: UsbBus> UsbClass<B> for Eem<'_, B> {
    fn get_configuration_descriptors(&self, writer: &mut DescriptorWriter) -> Result<()> {
        let descriptors = EemDescriptors::new(
            self.data_if.into(),
            self.eem_out.read_ep.address().into(),
            self.eem_in.write_ep.address().into(),
        );
        let interface = descriptors.interface;
        // bNumEndpoints comes from the two endpoints written below, iInterface
        // from the missing string
        debug_assert_eq!(interface.num_endpoints, 2);
        debug_assert_eq!(interface.interface_string, 0);

        writer.interface_alt(
            self.data_if,
            interface.alternate_setting,
            interface.interface_class,
            interface.interface_sub_class,
            interface.interface_protocol,
            None,
        )?;

        debug_assert_eq!(
            descriptors.data_out.max_packet_size,
            self.eem_out.read_ep.max_packet_size()
        );
        writer.endpoint(&self.eem_out.read_ep)?;
        debug_assert_eq!(
            descriptors.data_in.max_packet_size,
            self.eem_in.write_ep.max_packet_size()
        );
        writer.endpoint(&self.eem_in.write_ep)?;

        debug!("eem: configuration descriptors written");

        Ok(())
    }

    fn poll(&mut self) {
        if self.state != DeviceState::Configured {
            return;
        }

        if self.eem_in.write_pending {
            let _: Result<()> = self.eem_in.write_packet();
        }

        // packets left in the endpoint while a frame was held
        let _: Result<()> = self.eem_out.read_packet();
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if addr != self.eem_out.read_ep.address() {
            return;
        }

        let _: Result<()> = self.eem_out.read_packet();
    }

    fn endpoint_in_complete(&mut self, addr: EndpointAddress) {
        if addr != self.eem_in.write_ep.address() || self.state != DeviceState::Configured {
            return;
        }

        self.eem_in.packet_complete();
    }

    fn reset(&mut self) {
        info!("eem: reset");
        self.link_down();
    }
}

impl<'a, B: UsbBus> Device for Eem<'a, B> {
    type RxToken<'b> = EemRxToken<'a, 'b, B> where
    Self: 'b;
    type TxToken<'b> = EemTxToken<'a, 'b, B> where
    Self: 'b;

    fn receive(
        &mut self,
        _timestamp: smoltcp::time::Instant,
    ) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        if self.state == DeviceState::Configured
            && self.eem_in.can_write()
            && self.eem_out.frame_len().is_some()
        {
            Some((
                EemRxToken::new(&mut self.eem_out),
                EemTxToken::new(&mut self.eem_in),
            ))
        } else {
            None
        }
    }

    fn transmit(&mut self, _timestamp: smoltcp::time::Instant) -> Option<Self::TxToken<'_>> {
        if self.state == DeviceState::Configured && self.eem_in.can_write() {
            Some(EemTxToken::new(&mut self.eem_in))
        } else {
            None
        }
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.max_transmission_unit = MAX_SEGMENT_SIZE;
        caps.max_burst_size = Some(1);
        caps.medium = Medium::Ethernet;
        caps
    }
}

pub struct EemRxToken<'a, 'b, B: UsbBus> {
    eem: &'b mut EemOut<'a, B>,
}
impl<'a, 'b, B: UsbBus> EemRxToken<'a, 'b, B> {
    fn new(eem: &'b mut EemOut<'a, B>) -> Self {
        Self { eem }
    }
}

impl<'a, 'b, B: UsbBus> phy::RxToken for EemRxToken<'a, 'b, B> {
    fn consume<R, F>(self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        // panic safety: only handed out while a frame is held
        self.eem
            .read_frame(|frame| f(frame))
            .expect("eem: no frame held")
    }
}

pub struct EemTxToken<'a, 'b, B: UsbBus> {
    eem: &'b mut EemIn<'a, B>,
}
impl<'a, 'b, B: UsbBus> EemTxToken<'a, 'b, B> {
    fn new(eem: &'b mut EemIn<'a, B>) -> Self {
        Self { eem }
    }
}

impl<'a, 'b, B: UsbBus> phy::TxToken for EemTxToken<'a, 'b, B> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        // panic safety: only handed out while the gate is open, and smoltcp
        // keeps frames within max_transmission_unit
        let result = self
            .eem
            .prepare_frame(len, f)
            .expect("eem: transmit gate closed or frame too long");
        // a bus error has been logged and the frame dropped, smoltcp has no
        // way to hear about it
        let _: Result<()> = self.eem.start();
        result
    }
}
