//! Outgoing frames as chains of buffer segments.

/// One Ethernet frame, held in one or more byte segments.
///
/// The segments are yielded in frame order; iterating again yields the same
/// segments. `total_len` is the sum of the segment lengths and is known
/// before any segment is visited.
pub trait BufferChain {
    type Segments<'s>: Iterator<Item = &'s [u8]>
    where
        Self: 's;

    fn total_len(&self) -> usize;

    fn segments(&self) -> Self::Segments<'_>;
}

impl BufferChain for [u8] {
    type Segments<'s> = core::iter::Once<&'s [u8]> where Self: 's;

    fn total_len(&self) -> usize {
        self.len()
    }

    fn segments(&self) -> Self::Segments<'_> {
        core::iter::once(self)
    }
}

impl<const N: usize> BufferChain for [u8; N] {
    type Segments<'s> = core::iter::Once<&'s [u8]> where Self: 's;

    fn total_len(&self) -> usize {
        N
    }

    fn segments(&self) -> Self::Segments<'_> {
        core::iter::once(&self[..])
    }
}

impl<'a> BufferChain for [&'a [u8]] {
    type Segments<'s> = core::iter::Copied<core::slice::Iter<'s, &'s [u8]>> where Self: 's;

    fn total_len(&self) -> usize {
        self.iter().map(|segment| segment.len()).sum()
    }

    fn segments(&self) -> Self::Segments<'_> {
        self.iter().copied()
    }
}

/// A segment of a linked packet buffer, in the style of a network stack's
/// `pbuf` chain.
///
/// Each segment records the length of its own payload and the total length
/// of the packet from this segment to the end. The segment whose total
/// equals its own length is the last one, whatever `next` says.
#[derive(Debug, Clone, Copy)]
pub struct PacketBuf<'a> {
    payload: &'a [u8],
    tot_len: usize,
    next: Option<&'a PacketBuf<'a>>,
}

impl<'a> PacketBuf<'a> {
    /// A packet consisting of this segment only.
    #[must_use]
    pub const fn new(payload: &'a [u8]) -> Self {
        Self {
            payload,
            tot_len: payload.len(),
            next: None,
        }
    }

    /// Prepends `payload` to the packet starting at `next`.
    #[must_use]
    pub const fn chain(payload: &'a [u8], next: &'a PacketBuf<'a>) -> Self {
        Self {
            payload,
            tot_len: payload.len() + next.tot_len,
            next: Some(next),
        }
    }

    #[must_use]
    pub const fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Length of this segment's payload.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.payload.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Length of the packet from this segment to the end of the chain.
    #[must_use]
    pub const fn tot_len(&self) -> usize {
        self.tot_len
    }

    const fn is_last(&self) -> bool {
        self.tot_len == self.payload.len()
    }
}

/// Iterator over the segments of a [`PacketBuf`] chain.
pub struct PacketBufSegments<'a> {
    next: Option<&'a PacketBuf<'a>>,
}

impl<'a> Iterator for PacketBufSegments<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let segment = self.next?;
        self.next = if segment.is_last() { None } else { segment.next };
        Some(segment.payload)
    }
}

impl<'a> BufferChain for PacketBuf<'a> {
    type Segments<'s> = PacketBufSegments<'s> where Self: 's;

    fn total_len(&self) -> usize {
        self.tot_len
    }

    fn segments(&self) -> Self::Segments<'_> {
        PacketBufSegments { next: Some(self) }
    }
}
