//! Bounded FIFO of received datagrams.

use qsl_protocol::DEFAULT_PAYLOAD_SIZE_LIMIT;

use crate::error::InboxError;

/// Default number of slots.
pub const INBOX_CAPACITY: usize = 10;

/// Size of each slot.
pub const INBOX_SLOT_LEN: usize = DEFAULT_PAYLOAD_SIZE_LIMIT;

/// Fixed-capacity ring of datagrams.
///
/// A push against a full inbox is refused and leaves the queued datagrams
/// untouched; the newest arrival is the one dropped.
#[derive(Debug, Clone)]
pub struct Inbox<const N: usize = INBOX_CAPACITY> {
    slots: [[u8; INBOX_SLOT_LEN]; N],
    lens: [usize; N],
    head: usize,
    tail: usize,
    count: usize,
}

impl<const N: usize> Default for Inbox<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Inbox<N> {
    /// Create an empty inbox.
    pub fn new() -> Self {
        Inbox {
            slots: [[0u8; INBOX_SLOT_LEN]; N],
            lens: [0; N],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Queue a datagram.
    pub fn push(&mut self, datagram: &[u8]) -> Result<(), InboxError> {
        if self.is_full() {
            return Err(InboxError::Full {
                capacity: self.capacity(),
            });
        }
        if datagram.len() > INBOX_SLOT_LEN {
            return Err(InboxError::Oversized {
                size: datagram.len(),
                max: INBOX_SLOT_LEN,
            });
        }
        self.slots[self.tail][..datagram.len()].copy_from_slice(datagram);
        self.lens[self.tail] = datagram.len();
        self.tail = (self.tail + 1) % N;
        self.count += 1;
        Ok(())
    }

    /// Copy the oldest datagram into `buf` and drop it from the inbox.
    ///
    /// Returns the number of bytes written, truncated to `buf.len()`.
    pub fn pop(&mut self, buf: &mut [u8]) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let len = self.lens[self.head].min(buf.len());
        buf[..len].copy_from_slice(&self.slots[self.head][..len]);
        self.head = (self.head + 1) % N;
        self.count -= 1;
        Some(len)
    }

    /// Unread datagrams.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True when a push would be refused.
    pub fn is_full(&self) -> bool {
        self.count == N
    }

    /// Number of slots.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut inbox: Inbox<4> = Inbox::new();
        inbox.push(b"first").unwrap();
        inbox.push(b"second").unwrap();
        inbox.push(b"third").unwrap();

        let mut buf = [0u8; INBOX_SLOT_LEN];
        for expected in [&b"first"[..], b"second", b"third"] {
            let n = inbox.pop(&mut buf).unwrap();
            assert_eq!(&buf[..n], expected);
        }
        assert_eq!(inbox.pop(&mut buf), None);
    }

    #[test]
    fn test_full_inbox_drops_newest() {
        let mut inbox: Inbox<2> = Inbox::new();
        inbox.push(&[1]).unwrap();
        inbox.push(&[2, 2]).unwrap();
        assert_eq!(inbox.push(&[3, 3, 3]), Err(InboxError::Full { capacity: 2 }));
        assert_eq!(inbox.len(), 2);

        let mut buf = [0u8; 8];
        assert_eq!(inbox.pop(&mut buf), Some(1));
        assert_eq!(buf[0], 1);
        assert_eq!(inbox.pop(&mut buf), Some(2));
        assert_eq!(&buf[..2], &[2, 2]);
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_wraps_around() {
        let mut inbox: Inbox<3> = Inbox::new();
        let mut buf = [0u8; 4];
        for round in 0u8..10 {
            inbox.push(&[round; 4]).unwrap();
            assert_eq!(inbox.pop(&mut buf), Some(4));
            assert_eq!(buf, [round; 4]);
        }
    }

    #[test]
    fn test_oversized_and_truncating_reads() {
        let mut inbox: Inbox = Inbox::new();
        assert_eq!(inbox.capacity(), INBOX_CAPACITY);
        assert_eq!(
            inbox.push(&[0u8; INBOX_SLOT_LEN + 1]),
            Err(InboxError::Oversized {
                size: INBOX_SLOT_LEN + 1,
                max: INBOX_SLOT_LEN
            })
        );
        inbox.push(&[9u8; INBOX_SLOT_LEN]).unwrap();
        let mut small = [0u8; 10];
        assert_eq!(inbox.pop(&mut small), Some(10));
        assert!(inbox.is_empty());
    }
}
