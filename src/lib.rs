//! Communication Device Class Ethernet Emulation Model (CDC-EEM) class for [usb-device](https://crates.io/crates/usb-device).
//!
//! [`Eem`] carries Ethernet frames over a pair of bulk endpoints, one frame
//! per transfer in each direction. It implements [`smoltcp::phy::Device`] so
//! it can be handed straight to a `smoltcp` interface, or frames can be
//! exchanged directly with [`Eem::read_frame`] and [`Eem::xmit_packet`].
//!
//! ```ignore
//! static mut EEM_IN_BUFFER: [u8; FRAME_BUFFER_LEN] = [0; FRAME_BUFFER_LEN];
//! static mut EEM_OUT_BUFFER: [u8; FRAME_BUFFER_LEN] = [0; FRAME_BUFFER_LEN];
//!
//! let mut eem = Eem::new(&usb_alloc, unsafe { &mut EEM_IN_BUFFER }, unsafe { &mut EEM_OUT_BUFFER });
//! let mut usb_dev = UsbDeviceBuilder::new(&usb_alloc, UsbVidPid(0x1209, 0x0004))
//!     .device_class(usbd_eem::USB_CLASS_CDC)
//!     .build();
//!
//! loop {
//!     usb_dev.poll(&mut [&mut eem]);
//!     eem.update_device_state(usb_dev.state());
//!
//!     if eem.state() == DeviceState::Configured {
//!         interface.poll(timestamp, &mut eem, &mut sockets);
//!     }
//! }
//! ```

#![no_std]
#![warn(clippy::pedantic)]
#![warn(clippy::style)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![warn(clippy::use_self)]

#[macro_use]
mod log;

mod buffer;
mod bytes;
mod chain;
mod descriptor;
mod eem;
mod packet;

pub use chain::*;
pub use descriptor::*;
pub use eem::*;
pub use packet::{
    Crc, PacketHeader, PacketType, CRC_LEN, FRAME_BUFFER_LEN, HEADER_LEN, MAX_SEGMENT_SIZE,
    SENTINEL_CRC,
};
