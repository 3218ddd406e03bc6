use super::entries::{RecvEntries, SlotState, RECV_ENTRIES};
use crate::rdma::cq::WcStatus;
use crate::rdma::qp::Qp;
use crate::rdma::types::*;

/// Iterator over messages received into a [`RecvEntries`] ring.
///
/// Messages are polled in batches. [`Self::next`] consumes the current
/// message and [`Self::clear`] hands every consumed buffer back to the
/// receive queue. Dropping the iterator clears it.
pub struct RecvIter {
    qp: Qp,
    entries: RecvEntries,
    batch: Vec<usize>,
    cur: usize,
}

impl RecvIter {
    pub fn new(qp: &Qp, entries: &RecvEntries) -> Self {
        Self {
            qp: qp.clone(),
            entries: entries.clone(),
            batch: Vec::with_capacity(RECV_ENTRIES),
            cur: 0,
        }
    }

    /// Poll arrived messages into the batch, until the completion queue is
    /// empty or the batch holds every slot.
    ///
    /// The completion queue may be shared with queue pairs that served the
    /// ring before; their completions are skipped.
    fn fill(&mut self) {
        let qpn = self.qp.qp_num();
        loop {
            let room = RECV_ENTRIES - self.batch.len();
            if room == 0 {
                return;
            }
            let wcs = self.qp.poll_recv_completions(room as u32);
            let polled = wcs.len();

            let mut ring = self.entries.lock();
            for wc in wcs {
                if wc.qp_num() != qpn {
                    log::debug!(
                        "qpman: skipped completion of QP {:#x} on ring of QP {:#x}",
                        wc.qp_num(),
                        qpn
                    );
                    continue;
                }
                let idx = wc.wr_id() as usize;
                let Some(slot) = ring.slots.get_mut(idx) else {
                    log::warn!("qpman: receive completion for unknown slot {}", idx);
                    continue;
                };
                match wc.status() {
                    WcStatus::Success => {
                        slot.state = SlotState::Arrived {
                            imm: wc.imm().unwrap_or(0),
                            len: wc.bytes() as u32,
                        };
                        self.batch.push(idx);
                    }
                    status => {
                        log::warn!("qpman: receive slot {} completed with {}", idx, status);
                        slot.state = SlotState::Idle;
                    }
                }
            }
            if polled < room {
                return;
            }
        }
    }

    /// Check whether any arrived message is left to consume.
    ///
    /// Polls the receive queue once every message of the batch is consumed.
    pub fn has_messages(&mut self) -> bool {
        if self.cur == self.batch.len() {
            self.fill();
        }
        self.cur < self.batch.len()
    }

    /// Consume the current message. No-op past the last one.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) {
        if self.cur < self.batch.len() {
            self.cur += 1;
        }
    }

    /// Get the current message as `(immediate data, buffer address)`.
    /// Immediate data is 0 for messages sent without one.
    pub fn current_message(&self) -> Option<(ImmData, u64)> {
        let idx = *self.batch.get(self.cur)?;
        let ring = self.entries.lock();
        let slot = &ring.slots[idx];
        match slot.state {
            SlotState::Arrived { imm, .. } => Some((imm, slot.addr)),
            _ => None,
        }
    }

    /// Get the length of the current message in bytes.
    pub fn current_len(&self) -> Option<u32> {
        let idx = *self.batch.get(self.cur)?;
        match self.entries.lock().slots[idx].state {
            SlotState::Arrived { len, .. } => Some(len),
            _ => None,
        }
    }

    /// Repost every consumed buffer and restart from the first unconsumed
    /// message.
    pub fn clear(&mut self) {
        if self.cur == 0 {
            return;
        }

        let mut ring = self.entries.lock();
        for &idx in &self.batch[..self.cur] {
            ring.slots[idx].state = SlotState::Idle;
            if let Err(e) = ring.post(&self.qp, idx) {
                log::warn!("qpman: cannot repost receive slot {}: {}", idx, e);
            }
        }
        drop(ring);
        self.batch.drain(..self.cur);
        self.cur = 0;
    }
}

impl Drop for RecvIter {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::fabric::{Fabric, FabricConfig};
    use crate::rdma::cq::Cq;
    use crate::rdma::mr::{Mem, Mr};
    use crate::rdma::nic::{DevIdx, Nic};
    use crate::rdma::qp::{QpConfig, QpState, ReqDesc, ReqPayload, WrOpcode};
    use crate::rdma::recv::SimpleAllocator;

    const MSG: u32 = 64;

    struct Setup {
        _fabric: Arc<Fabric>,
        sender: Qp,
        send_mr: Mr,
        _recv_mr: Mr,
        receiver: Qp,
        entries: RecvEntries,
    }

    fn setup() -> Setup {
        let fabric = Fabric::new(FabricConfig::default());
        let nic0 = Nic::open_on(fabric.clone(), DevIdx::new(0, 1), 0).unwrap();
        let nic1 = Nic::open_on(fabric.clone(), DevIdx::new(1, 1), 0).unwrap();

        let send_mr = Mr::reg(&Mem::new(4096), &nic0).unwrap();
        let recv_mr = Mr::reg(&Mem::new(RECV_ENTRIES * MSG as usize), &nic1).unwrap();
        let entries = RecvEntries::new(&mut SimpleAllocator::new(&recv_mr), MSG).unwrap();

        let sender = Qp::create(&nic0, QpConfig::default(), None).unwrap();
        let receiver = Qp::create(&nic1, QpConfig::default(), None).unwrap();
        entries.post_all(&receiver).unwrap();
        sender.connect(&receiver.my_attr()).unwrap();
        receiver.connect(&sender.my_attr()).unwrap();
        sender.bind_local_mr(send_mr.attr());

        Setup {
            _fabric: fabric,
            sender,
            send_mr,
            _recv_mr: recv_mr,
            receiver,
            entries,
        }
    }

    fn send(s: &Setup, imm: ImmData) {
        let desc = ReqDesc::new(WrOpcode::SendWithImm, 16, imm as u64);
        let payload = ReqPayload::new(s.send_mr.addr(), 0, imm);
        s.sender.send_normal(desc, payload).unwrap();
        s.sender.wait_completion(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn empty_ring_has_no_messages() {
        let s = setup();
        assert_eq!(s.entries.posted(), RECV_ENTRIES);
        let mut iter = RecvIter::new(&s.receiver, &s.entries);
        assert!(!iter.has_messages());
        assert!(iter.current_message().is_none());
        iter.next();
        iter.clear();
        assert_eq!(s.entries.posted(), RECV_ENTRIES);
    }

    #[test]
    fn messages_yielded_once_in_order() {
        let s = setup();
        for imm in 1..=3 {
            send(&s, imm);
        }

        let mut iter = RecvIter::new(&s.receiver, &s.entries);
        let mut seen = Vec::new();
        while iter.has_messages() {
            let (imm, addr) = iter.current_message().unwrap();
            assert_eq!(iter.current_len(), Some(16));
            seen.push((imm, addr));
            iter.next();
        }
        assert_eq!(seen.iter().map(|m| m.0).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_ne!(seen[0].1, seen[1].1);
    }

    #[test]
    fn clear_returns_exactly_consumed_slots() {
        let s = setup();
        for imm in 1..=3 {
            send(&s, imm);
        }

        let mut iter = RecvIter::new(&s.receiver, &s.entries);
        assert!(iter.has_messages());
        iter.next();
        iter.next();
        assert_eq!(s.entries.unconsumed(), 3);

        iter.clear();
        assert_eq!(s.entries.unconsumed(), 1);
        assert_eq!(s.entries.posted(), RECV_ENTRIES - 1);

        // The unconsumed message is kept, consumed ones never come back.
        assert!(iter.has_messages());
        assert_eq!(iter.current_message().map(|m| m.0), Some(3));
        iter.next();
        assert!(!iter.has_messages());
        iter.clear();
        assert_eq!(s.entries.posted(), RECV_ENTRIES);

        send(&s, 4);
        assert!(iter.has_messages());
        assert_eq!(iter.current_message().map(|m| m.0), Some(4));
    }

    #[test]
    fn arrivals_after_consumed_batch_are_seen() {
        let s = setup();
        send(&s, 1);

        let mut iter = RecvIter::new(&s.receiver, &s.entries);
        assert!(iter.has_messages());
        iter.next();
        assert!(!iter.has_messages());

        send(&s, 2);
        assert_eq!(s.entries.unconsumed(), 2);
        assert!(iter.has_messages());
        assert_eq!(iter.current_message().map(|m| m.0), Some(2));
        iter.next();
        iter.clear();
        assert_eq!(s.entries.posted(), RECV_ENTRIES);
    }

    #[test]
    fn completions_of_previous_qp_are_skipped() {
        let fabric = Fabric::new(FabricConfig::default());
        let nic0 = Nic::open_on(fabric.clone(), DevIdx::new(0, 1), 0).unwrap();
        let nic1 = Nic::open_on(fabric.clone(), DevIdx::new(1, 1), 0).unwrap();
        let send_mr = Mr::reg(&Mem::new(4096), &nic0).unwrap();
        let recv_mr = Mr::reg(&Mem::new(RECV_ENTRIES * MSG as usize), &nic1).unwrap();
        let entries = RecvEntries::new(&mut SimpleAllocator::new(&recv_mr), MSG).unwrap();
        let cq = Cq::new(nic1.context(), 4096).unwrap();

        // The previous queue pair fails with the whole ring posted, leaving
        // one flush completion per slot on the shared completion queue.
        let previous = Qp::create(&nic1, QpConfig::default(), Some(&cq)).unwrap();
        entries.post_all(&previous).unwrap();
        previous.set_error();
        entries.reset();

        let sender = Qp::create(&nic0, QpConfig::default(), None).unwrap();
        let receiver = Qp::create(&nic1, QpConfig::default(), Some(&cq)).unwrap();
        entries.post_all(&receiver).unwrap();
        sender.connect(&receiver.my_attr()).unwrap();
        receiver.connect(&sender.my_attr()).unwrap();
        sender.bind_local_mr(send_mr.attr());

        let desc = ReqDesc::new(WrOpcode::SendWithImm, 16, 1);
        let payload = ReqPayload::new(send_mr.addr(), 0, 7);
        sender.send_normal(desc, payload).unwrap();
        sender.wait_completion(Duration::from_secs(1)).unwrap();

        let mut iter = RecvIter::new(&receiver, &entries);
        assert!(iter.has_messages());
        assert_eq!(iter.current_message().map(|m| m.0), Some(7));
        assert_eq!(entries.posted(), RECV_ENTRIES - 1);
        iter.next();
        assert!(!iter.has_messages());
        iter.clear();
        assert_eq!(entries.posted(), RECV_ENTRIES);
    }

    #[test]
    fn drop_reposts_consumed() {
        let s = setup();
        send(&s, 9);
        {
            let mut iter = RecvIter::new(&s.receiver, &s.entries);
            assert!(iter.has_messages());
            iter.next();
        }
        assert_eq!(s.entries.posted(), RECV_ENTRIES);
        assert_eq!(s.entries.unconsumed(), 0);
    }

    #[test]
    fn ring_never_exceeds_capacity() {
        let s = setup();
        for imm in 0..RECV_ENTRIES as u32 {
            send(&s, imm);
        }
        assert_eq!(s.entries.posted(), 0);

        // No credit left: the next send stalls until a buffer is returned.
        let desc = ReqDesc::new(WrOpcode::SendWithImm, 16, 1000);
        let payload = ReqPayload::new(s.send_mr.addr(), 0, 1000);
        s.sender.send_normal(desc, payload).unwrap();
        assert!(s.sender.poll_completion().is_none());

        let mut iter = RecvIter::new(&s.receiver, &s.entries);
        assert!(iter.has_messages());
        assert_eq!(s.entries.unconsumed(), RECV_ENTRIES);
        iter.next();
        iter.clear();
        let (wr_id, _) = s.sender.wait_completion(Duration::from_secs(1)).unwrap();
        assert_eq!(wr_id, 1000);
        assert_eq!(s.receiver.state(), QpState::Rts);
    }

    #[test]
    fn allocator_too_small_fails() {
        let fabric = Fabric::new(FabricConfig::default());
        let nic = Nic::open_on(fabric.clone(), DevIdx::new(0, 1), 0).unwrap();
        let mr = Mr::reg(&Mem::new(4096), &nic).unwrap();
        assert!(matches!(
            RecvEntries::new(&mut SimpleAllocator::new(&mr), MSG),
            Err(crate::error::Error::OutOfMemory { .. })
        ));
    }
}
