//! Interface and endpoint descriptors of the EEM function.
//!
//! References:
//!   - Universal Serial Bus Communications Class Subclass Specification for
//!     Ethernet Emulation Model Devices - Revision 1.0 - February 2, 2005
//!   - Universal Serial Bus Specification - Revision 2.0, section 9.6

/// This should be used as `device_class` when building the `UsbDevice`.
pub const USB_CLASS_CDC: u8 = 0x02;
pub const CDC_SUBCLASS_EEM: u8 = 0x0C;
pub const CDC_PROTOCOL_EEM: u8 = 0x07;

/// Full speed bulk max packet size.
pub const MAX_PACKET_SIZE: u16 = 64;

const DESCRIPTOR_TYPE_INTERFACE: u8 = 0x04;
const DESCRIPTOR_TYPE_ENDPOINT: u8 = 0x05;
const ENDPOINT_ATTRIBUTES_BULK: u8 = 0x02;

const INTERFACE_DESCRIPTOR_LEN: usize = 9;
const ENDPOINT_DESCRIPTOR_LEN: usize = 7;

/// Length of the descriptor group written by [`EemDescriptors::to_bytes`].
pub const EEM_DESCRIPTORS_LEN: usize = INTERFACE_DESCRIPTOR_LEN + 2 * ENDPOINT_DESCRIPTOR_LEN;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_sub_class: u8,
    pub interface_protocol: u8,
    pub interface_string: u8,
}

impl InterfaceDescriptor {
    const fn to_bytes(self) -> [u8; INTERFACE_DESCRIPTOR_LEN] {
        [
            INTERFACE_DESCRIPTOR_LEN as u8, // bLength
            DESCRIPTOR_TYPE_INTERFACE,      // bDescriptorType
            self.interface_number,          // bInterfaceNumber
            self.alternate_setting,         // bAlternateSetting
            self.num_endpoints,             // bNumEndpoints
            self.interface_class,           // bInterfaceClass
            self.interface_sub_class,       // bInterfaceSubClass
            self.interface_protocol,        // bInterfaceProtocol
            self.interface_string,          // iInterface
        ]
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct EndpointDescriptor {
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    const fn bulk(endpoint_address: u8) -> Self {
        Self {
            endpoint_address,
            attributes: ENDPOINT_ATTRIBUTES_BULK,
            max_packet_size: MAX_PACKET_SIZE,
            // ignored for bulk endpoints
            interval: 0,
        }
    }

    const fn to_bytes(self) -> [u8; ENDPOINT_DESCRIPTOR_LEN] {
        let [size_lo, size_hi] = self.max_packet_size.to_le_bytes();
        [
            ENDPOINT_DESCRIPTOR_LEN as u8, // bLength
            DESCRIPTOR_TYPE_ENDPOINT,      // bDescriptorType
            self.endpoint_address,         // bEndpointAddress
            self.attributes,               // bmAttributes
            size_lo,                       // wMaxPacketSize
            size_hi,
            self.interval, // bInterval
        ]
    }
}

/// The descriptor group of one EEM function: a single data interface with a
/// bulk OUT and a bulk IN endpoint. No alternate settings, no notification
/// endpoint, no string.
///
/// This is the reference layout of the group. [`Eem`](crate::Eem) emits the
/// same fields through `usb-device`'s `DescriptorWriter`, which derives
/// `bNumEndpoints` from the endpoints it writes and leaves `iInterface` at
/// zero when no string is given.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct EemDescriptors {
    pub interface: InterfaceDescriptor,
    pub data_out: EndpointDescriptor,
    pub data_in: EndpointDescriptor,
}

impl EemDescriptors {
    /// `data_out` and `data_in` are full endpoint addresses, direction bit
    /// included.
    #[must_use]
    pub const fn new(interface: u8, data_out: u8, data_in: u8) -> Self {
        Self {
            interface: InterfaceDescriptor {
                interface_number: interface,
                alternate_setting: 0,
                num_endpoints: 2,
                interface_class: USB_CLASS_CDC,
                interface_sub_class: CDC_SUBCLASS_EEM,
                interface_protocol: CDC_PROTOCOL_EEM,
                interface_string: 0,
            },
            data_out: EndpointDescriptor::bulk(data_out),
            data_in: EndpointDescriptor::bulk(data_in),
        }
    }

    /// The group as it appears in the configuration descriptor.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; EEM_DESCRIPTORS_LEN] {
        let interface = self.interface.to_bytes();
        let data_out = self.data_out.to_bytes();
        let data_in = self.data_in.to_bytes();

        let mut bytes = [0u8; EEM_DESCRIPTORS_LEN];
        let mut i = 0;
        while i < INTERFACE_DESCRIPTOR_LEN {
            bytes[i] = interface[i];
            i += 1;
        }
        let mut j = 0;
        while j < ENDPOINT_DESCRIPTOR_LEN {
            bytes[INTERFACE_DESCRIPTOR_LEN + j] = data_out[j];
            bytes[INTERFACE_DESCRIPTOR_LEN + ENDPOINT_DESCRIPTOR_LEN + j] = data_in[j];
            j += 1;
        }
        bytes
    }
}
