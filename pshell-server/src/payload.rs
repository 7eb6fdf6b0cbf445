//! Payload-size negotiation and growth (spec.md §4.5).

pub const DEFAULT_INITIAL_CAPACITY: usize = 4096;
pub const DEFAULT_CHUNK: usize = 4096;
pub const DEFAULT_GUARDBAND: usize = 400;

#[derive(Debug, Clone, Copy)]
pub enum GrowthPolicy {
    /// Extend by exactly the overflow amount.
    Exact,
    /// Extend by the configured chunk until the write fits.
    Chunk(usize),
    /// Flush the accumulated buffer immediately and resume at offset 0.
    /// Only usable on a datagram server while the current command is not a
    /// control command (spec.md §4.5) - the caller passes `allow_flush`
    /// accordingly on every push.
    FlushOnOverflow,
}

/// A server reply buffer that tracks its own negotiated capacity and
/// reports growth events so the dispatcher can emit `UPDATE_PAYLOAD_SIZE`
/// before the final reply.
pub struct PayloadBuffer {
    data: Vec<u8>,
    capacity: usize,
    guardband: usize,
    policy: GrowthPolicy,
    grew_to: Option<usize>,
}

impl PayloadBuffer {
    pub fn new(capacity: usize, guardband: usize, policy: GrowthPolicy) -> PayloadBuffer {
        PayloadBuffer {
            data: Vec::with_capacity(capacity),
            capacity,
            guardband,
            policy,
            grew_to: None,
        }
    }

    pub fn with_defaults(policy: GrowthPolicy) -> PayloadBuffer {
        PayloadBuffer::new(DEFAULT_INITIAL_CAPACITY, DEFAULT_GUARDBAND, policy)
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.grew_to = None;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Consume the pending growth event, if any, so the dispatcher can emit
    /// exactly one `UPDATE_PAYLOAD_SIZE` frame per growth.
    pub fn take_growth(&mut self) -> Option<usize> {
        self.grew_to.take()
    }

    fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    /// Append `chunk`, applying the configured growth policy. Returns the
    /// bytes to flush immediately when the `FlushOnOverflow` policy fires.
    pub fn push(&mut self, chunk: &[u8], allow_flush: bool) -> Option<Vec<u8>> {
        let before = self.capacity;

        let flushed = match self.policy {
            GrowthPolicy::Exact => {
                if chunk.len() > self.remaining() {
                    self.capacity = self.data.len() + chunk.len();
                }
                self.data.extend_from_slice(chunk);
                None
            }
            GrowthPolicy::Chunk(step) => {
                while chunk.len() > self.remaining() {
                    self.capacity += step;
                }
                self.data.extend_from_slice(chunk);
                None
            }
            GrowthPolicy::FlushOnOverflow => {
                let guarded = self.remaining().saturating_sub(self.guardband.min(self.remaining()));
                if allow_flush && chunk.len() > guarded {
                    let flushed = std::mem::replace(&mut self.data, Vec::with_capacity(before));
                    self.data.extend_from_slice(chunk);
                    Some(flushed)
                } else {
                    while chunk.len() > self.remaining() {
                        self.capacity += DEFAULT_CHUNK;
                    }
                    self.data.extend_from_slice(chunk);
                    None
                }
            }
        };

        if self.capacity != before {
            self.grew_to = Some(self.capacity);
        }

        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_capacity_triggers_no_growth() {
        let mut buf = PayloadBuffer::new(8, 0, GrowthPolicy::Exact);
        buf.push(&[0u8; 8], false);
        assert_eq!(buf.take_growth(), None);
    }

    #[test]
    fn one_byte_over_triggers_exactly_one_growth() {
        let mut buf = PayloadBuffer::new(8, 0, GrowthPolicy::Exact);
        buf.push(&[0u8; 9], false);
        assert_eq!(buf.take_growth(), Some(9));
        assert_eq!(buf.take_growth(), None);
    }

    #[test]
    fn chunk_policy_grows_in_multiples() {
        let mut buf = PayloadBuffer::new(4096, 0, GrowthPolicy::Chunk(4096));
        buf.push(&[0u8; 5000], false);
        assert_eq!(buf.take_growth(), Some(8192));
    }

    #[test]
    fn flush_on_overflow_emits_previous_contents() {
        let mut buf = PayloadBuffer::new(16, 4, GrowthPolicy::FlushOnOverflow);
        buf.push(b"hello", true);
        let flushed = buf.push(&[b'x'; 16], true);
        assert_eq!(flushed, Some(b"hello".to_vec()));
        assert_eq!(buf.as_slice(), &[b'x'; 16][..]);
    }

    #[test]
    fn flush_disallowed_for_control_commands_falls_back_to_growth() {
        let mut buf = PayloadBuffer::new(16, 4, GrowthPolicy::FlushOnOverflow);
        buf.push(b"hello", false);
        let flushed = buf.push(&[b'x'; 16], false);
        assert_eq!(flushed, None);
        assert!(buf.capacity() > 16);
    }
}
