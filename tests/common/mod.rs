//! In-memory `UsbBus` that plays the host side of the bulk endpoints.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use usb_device::bus::{PollResult, UsbBus, UsbBusAllocator};
use usb_device::class_prelude::UsbClass;
use usb_device::endpoint::{EndpointAddress, EndpointType};
use usb_device::prelude::{UsbDevice, UsbDeviceBuilder, UsbVidPid};
use usb_device::{Result, UsbDirection, UsbError};
use usbd_eem::{Eem, MAX_PACKET_SIZE, USB_CLASS_CDC};

#[derive(Default)]
pub struct Host {
    /// Packets the host has queued on the bulk OUT endpoint.
    pub out_packets: VecDeque<Vec<u8>>,
    /// Packets the device has written to the bulk IN endpoint.
    pub in_packets: Vec<Vec<u8>>,
    /// Refuse IN packets as if the endpoint buffer were still full.
    pub in_busy: bool,
    /// Fail IN packets with this error.
    pub in_error: Option<UsbError>,
    pub bulk_out: Option<EndpointAddress>,
    pub bulk_in: Option<EndpointAddress>,
}

#[derive(Clone, Default)]
pub struct HostHandle(Arc<Mutex<Host>>);

impl HostHandle {
    pub fn lock(&self) -> MutexGuard<'_, Host> {
        self.0.lock().unwrap()
    }

    pub fn out_addr(&self) -> EndpointAddress {
        self.lock().bulk_out.unwrap()
    }

    pub fn in_addr(&self) -> EndpointAddress {
        self.lock().bulk_in.unwrap()
    }

    pub fn queued_out(&self) -> usize {
        self.lock().out_packets.len()
    }

    pub fn in_packet_count(&self) -> usize {
        self.lock().in_packets.len()
    }

    pub fn set_in_busy(&self, busy: bool) {
        self.lock().in_busy = busy;
    }

    pub fn set_in_error(&self, error: Option<UsbError>) {
        self.lock().in_error = error;
    }

    /// Queues `transfer` on the OUT endpoint as max size packets, ending with
    /// a short or zero length packet, and signals each packet to `class`.
    pub fn send_transfer<C: UsbClass<MockBus>>(&self, class: &mut C, transfer: &[u8]) {
        let packets = split_transfer(transfer);
        let count = packets.len();
        self.lock().out_packets.extend(packets);

        let addr = self.out_addr();
        for _ in 0..count {
            class.endpoint_out(addr);
        }
    }

    /// Acknowledges IN packets until the device stops writing, and returns
    /// every packet written since the last call.
    pub fn receive_packets<C: UsbClass<MockBus>>(&self, class: &mut C) -> Vec<Vec<u8>> {
        let addr = self.in_addr();
        loop {
            let before = self.in_packet_count();
            class.endpoint_in_complete(addr);
            if self.in_packet_count() == before {
                break;
            }
        }
        std::mem::take(&mut self.lock().in_packets)
    }

    /// Like `receive_packets`, with the packets joined into one transfer.
    pub fn receive_transfer<C: UsbClass<MockBus>>(&self, class: &mut C) -> Vec<u8> {
        self.receive_packets(class).concat()
    }
}

pub fn split_transfer(transfer: &[u8]) -> Vec<Vec<u8>> {
    let mps = usize::from(MAX_PACKET_SIZE);
    let mut packets: Vec<Vec<u8>> = transfer.chunks(mps).map(<[u8]>::to_vec).collect();
    if transfer.len() % mps == 0 {
        packets.push(Vec::new());
    }
    packets
}

pub struct MockBus {
    host: HostHandle,
    next_index: usize,
}

impl UsbBus for MockBus {
    fn alloc_ep(
        &mut self,
        ep_dir: UsbDirection,
        ep_addr: Option<EndpointAddress>,
        ep_type: EndpointType,
        _max_packet_size: u16,
        _interval: u8,
    ) -> Result<EndpointAddress> {
        let addr = if let Some(addr) = ep_addr {
            addr
        } else {
            self.next_index += 1;
            EndpointAddress::from_parts(self.next_index, ep_dir)
        };

        if matches!(ep_type, EndpointType::Bulk) {
            let mut host = self.host.lock();
            match ep_dir {
                UsbDirection::Out => host.bulk_out = Some(addr),
                UsbDirection::In => host.bulk_in = Some(addr),
            }
        }

        Ok(addr)
    }

    fn enable(&mut self) {}

    fn reset(&self) {}

    fn set_device_address(&self, _addr: u8) {}

    fn write(&self, ep_addr: EndpointAddress, buf: &[u8]) -> Result<usize> {
        let mut host = self.host.lock();
        if Some(ep_addr) == host.bulk_in {
            if let Some(error) = host.in_error {
                return Err(error);
            }
            if host.in_busy {
                return Err(UsbError::WouldBlock);
            }
            host.in_packets.push(buf.to_vec());
        }
        Ok(buf.len())
    }

    fn read(&self, ep_addr: EndpointAddress, buf: &mut [u8]) -> Result<usize> {
        let mut host = self.host.lock();
        if Some(ep_addr) != host.bulk_out {
            return Err(UsbError::WouldBlock);
        }
        let Some(packet) = host.out_packets.pop_front() else {
            return Err(UsbError::WouldBlock);
        };
        if packet.len() > buf.len() {
            return Err(UsbError::BufferOverflow);
        }
        buf[..packet.len()].copy_from_slice(&packet);
        Ok(packet.len())
    }

    fn set_stalled(&self, _ep_addr: EndpointAddress, _stalled: bool) {}

    fn is_stalled(&self, _ep_addr: EndpointAddress) -> bool {
        false
    }

    fn suspend(&self) {}

    fn resume(&self) {}

    fn poll(&self) -> PollResult {
        PollResult::None
    }
}

pub fn bus() -> (UsbBusAllocator<MockBus>, HostHandle) {
    let host = HostHandle::default();
    let bus = MockBus {
        host: host.clone(),
        next_index: 0,
    };
    (UsbBusAllocator::new(bus), host)
}

/// Builds the device, which completes bus initialisation. Classes must be
/// created before this.
pub fn device(alloc: &UsbBusAllocator<MockBus>) -> UsbDevice<'_, MockBus> {
    UsbDeviceBuilder::new(alloc, UsbVidPid(0x1209, 0x0004))
        .device_class(USB_CLASS_CDC)
        .build()
}

/// A data packet carrying `frame`, as a host would send it.
pub fn data_packet(frame: &[u8]) -> Vec<u8> {
    let length = u16::try_from(frame.len() + 4).unwrap();
    let mut packet = length.to_le_bytes().to_vec();
    packet.extend_from_slice(frame);
    packet.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    packet
}

pub fn frame(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn read_frame(eem: &mut Eem<'_, MockBus>) -> Option<Vec<u8>> {
    eem.read_frame(|frame| frame.to_vec()).ok()
}
