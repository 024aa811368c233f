use usb_device::Result;
use usb_device::UsbError;

/// A fixed-capacity arena with independent fill (write) and drain (read)
/// positions. Reads never pass the write position.
pub(crate) struct RWBuffer<'a, const LEN: usize> {
    store: &'a mut [u8; LEN],
    read_ptr: usize,
    write_ptr: usize,
}

impl<'a, const LEN: usize> RWBuffer<'a, LEN> {
    pub fn new(store: &'a mut [u8; LEN]) -> Self {
        Self {
            store,
            read_ptr: Default::default(),
            write_ptr: Default::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.write_ptr == 0
    }

    pub fn has_unread(&self) -> bool {
        self.unread() > 0
    }

    pub fn unread(&self) -> usize {
        debug_assert!(self.read_ptr <= self.write_ptr);
        self.write_ptr - self.read_ptr
    }

    /// Bytes that can still be written before the buffer is full.
    pub fn remaining(&self) -> usize {
        LEN - self.write_ptr
    }

    /// Everything written so far, from the start of the buffer.
    pub fn written(&self) -> &[u8] {
        &self.store[..self.write_ptr]
    }

    pub fn written_mut(&mut self) -> &mut [u8] {
        &mut self.store[..self.write_ptr]
    }

    /// Hands `f` the next `len` bytes of free space. `f` returns how many of
    /// them it filled.
    pub fn write<R>(
        &mut self,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> Result<(usize, R)>,
    ) -> Result<(usize, R)> {
        let Some(buf) = self.store.get_mut(self.write_ptr..self.write_ptr + len) else {
            error!("buffer: tried to write more data than capacity");
            return Err(UsbError::BufferOverflow);
        };
        let (written, r) = f(buf)?;
        if written > len {
            error!("buffer: claim to have written more data than allocated");
            return Err(UsbError::BufferOverflow);
        }
        self.write_ptr += written;
        Ok((written, r))
    }

    pub fn clear(&mut self) {
        self.read_ptr = 0;
        self.write_ptr = 0;
    }

    /// Hands `f` the next `len` unread bytes. `f` returns how many of them it
    /// consumed; nothing is consumed if `f` fails.
    pub fn read<R>(
        &mut self,
        len: usize,
        f: impl FnOnce(&[u8]) -> Result<(usize, R)>,
    ) -> Result<(usize, R)> {
        if len > self.unread() {
            error!("buffer: tried to read more data than available");
            return Err(UsbError::InvalidState);
        }
        let buf = &self.store[self.read_ptr..self.read_ptr + len];

        let (read, r) = f(buf)?;
        if read > len {
            error!("buffer: claim to have read more data than allocated");
            return Err(UsbError::BufferOverflow);
        }
        self.read_ptr += read;
        Ok((read, r))
    }
}
