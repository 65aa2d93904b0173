/*! The per-friend read-receipt queue.

A plain FIFO of `{transport_packet_number, message_id}` pairs, kept as
its own small type rather than folded into `Friend` or `Messenger`.
*/

use std::collections::VecDeque;

use transport::{PacketNumber, Transport};

/// One outstanding message awaiting delivery confirmation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Receipt {
    packet_number: PacketNumber,
    message_id: u32,
}

/// FIFO of receipts for a single friend.
///
/// Invariant: no two entries share a `message_id`.
#[derive(Default)]
pub struct ReceiptQueue {
    queue: VecDeque<Receipt>,
}

impl ReceiptQueue {
    /// A fresh, empty queue.
    pub fn new() -> Self {
        ReceiptQueue { queue: VecDeque::new() }
    }

    /// Enqueue a newly sent message awaiting acknowledgement.
    pub fn push(&mut self, packet_number: PacketNumber, message_id: u32) {
        debug_assert!(
            !self.queue.iter().any(|r| r.message_id == message_id),
            "message_id {} enqueued twice", message_id
        );
        self.queue.push_back(Receipt { packet_number, message_id });
    }

    /// Drain every head entry whose packet has been acknowledged, calling
    /// `on_receipt` with its `message_id` in order, and stopping at the
    /// first not-yet-acknowledged entry.
    pub fn drain_acknowledged<T: Transport, F: FnMut(u32)>(
        &mut self,
        transport: &T,
        handle: u64,
        mut on_receipt: F,
    ) {
        while let Some(front) = self.queue.front() {
            if transport.is_acknowledged(handle, front.packet_number) {
                let message_id = self.queue.pop_front().unwrap().message_id;
                on_receipt(message_id);
            } else {
                break;
            }
        }
    }

    /// Discard every outstanding receipt without notifying the application
    /// (called when the friend goes offline).
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Number of outstanding receipts.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// `true` if there are no outstanding receipts.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    struct AckTransport {
        acked: RefCell<HashSet<u64>>,
    }

    impl Transport for AckTransport {
        fn connect(&mut self, _pk: ::crypto::PublicKey) -> u64 { 0 }
        fn close(&mut self, _handle: u64) {}
        fn status(&self, _handle: u64) -> ::transport::ConnectionStatus { ::transport::ConnectionStatus::Connected }
        fn connection_kind(&self, _handle: u64) -> ::transport::ConnectionKind { ::transport::ConnectionKind::Udp }
        fn send_reliable(&mut self, _handle: u64, _data: &[u8]) -> Result<PacketNumber, ::transport::TransportError> {
            unimplemented!()
        }
        fn send_unreliable(&mut self, _handle: u64, _data: &[u8]) -> Result<(), ::transport::TransportError> {
            unimplemented!()
        }
        fn is_acknowledged(&self, _handle: u64, packet: PacketNumber) -> bool {
            self.acked.borrow().contains(&packet.0)
        }
        fn free_send_slots(&self, _handle: u64) -> usize { 100 }
        fn is_congested(&self, _handle: u64) -> bool { false }
    }

    #[test]
    fn drains_only_in_order_prefix() {
        // Scenario 6: m1, m2, m3 sent in order; transport ACKs m2, m1, m3;
        // the application still observes m1, m2, m3.
        let mut queue = ReceiptQueue::new();
        queue.push(PacketNumber(1), 101); // m1
        queue.push(PacketNumber(2), 102); // m2
        queue.push(PacketNumber(3), 103); // m3

        let transport = AckTransport { acked: RefCell::new(HashSet::new()) };
        let mut seen = Vec::new();

        // Only m2 acked: nothing drains, because m1 is still head-of-line.
        transport.acked.borrow_mut().insert(2);
        queue.drain_acknowledged(&transport, 0, |id| seen.push(id));
        assert!(seen.is_empty());
        assert_eq!(queue.len(), 3);

        // Now m1 acks too: m1 then m2 drain, m3 still blocks.
        transport.acked.borrow_mut().insert(1);
        queue.drain_acknowledged(&transport, 0, |id| seen.push(id));
        assert_eq!(seen, vec![101, 102]);
        assert_eq!(queue.len(), 1);

        // Finally m3 acks.
        transport.acked.borrow_mut().insert(3);
        queue.drain_acknowledged(&transport, 0, |id| seen.push(id));
        assert_eq!(seen, vec![101, 102, 103]);
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_discards_silently() {
        let mut queue = ReceiptQueue::new();
        queue.push(PacketNumber(1), 1);
        queue.clear();
        assert!(queue.is_empty());
    }
}
