use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::daemon::{ChannelProvider, ChannelRequest, Daemon};
use crate::error::{Error, Result};
use crate::rdma::cq::Cq;
use crate::rdma::qp::{Qp, QpAttr, QpState};
use crate::rdma::recv::{RecvAllocator, RecvEntries, RECV_ENTRIES};

/// The queue pair a channel is connected through.
struct Serving {
    qp_name: String,
    qp: Qp,
    /// Created by the manager rather than advertised by the application.
    created: bool,
}

struct Channel {
    cq: Cq,
    allocator: Box<dyn RecvAllocator + Send>,
    entries: Option<RecvEntries>,
    serving: Option<Serving>,
}

impl Channel {
    /// Take the receive ring back from `qp`, which stops serving.
    ///
    /// `qp` is moved to ERROR and its flush completions are drained, so a
    /// later queue pair on the same completion queue starts clean.
    fn reclaim(&mut self, qp: &Qp) {
        qp.set_error();
        let mut stale = 0;
        loop {
            let wcs = self.cq.poll(RECV_ENTRIES as u32);
            if wcs.is_empty() {
                break;
            }
            stale += wcs.len();
        }
        if let Some(entries) = &self.entries {
            entries.reset();
        }
        self.serving = None;
        log::debug!(
            "qpman: reclaimed receive ring from QP {:#x}, {} completions drained",
            qp.qp_num(),
            stale
        );
    }
}

#[derive(Default)]
struct RecvManagerInner {
    channels: Mutex<HashMap<String, Channel>>,
}

/// Server-side manager of named receive channels.
///
/// A channel pairs a receive completion queue with a buffer allocator. When
/// a remote session asks for the channel, a queue pair sharing that
/// completion queue is brought up, the channel's receive ring is populated
/// from the allocator on first use, and the queue pair is connected to the
/// requester.
///
/// Releasing a channel, or failing to bring it up, moves the serving queue
/// pair to ERROR. A queue pair the manager created is also withdrawn from the
/// daemon; one the application advertised stays advertised, and the
/// application decides when to replace it.
///
/// Cloning shares the manager.
#[derive(Clone)]
pub struct RecvManager {
    inner: Arc<RecvManagerInner>,
}

impl RecvManager {
    /// Create a manager and install it as the channel provider of `daemon`.
    pub fn new(daemon: &Daemon) -> Self {
        let manager = Self {
            inner: Arc::new(RecvManagerInner::default()),
        };
        daemon.set_channel_provider(Arc::new(manager.clone()));
        manager
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a receive channel under `name`.
    pub fn reg_recv_cq(
        &self,
        name: impl Into<String>,
        cq: &Cq,
        allocator: impl RecvAllocator + Send + 'static,
    ) -> Result<()> {
        let name = name.into();
        let mut channels = self.channels();
        if channels.contains_key(&name) {
            return Err(Error::Duplicate(format!("channel {}", name)));
        }
        channels.insert(
            name,
            Channel {
                cq: cq.clone(),
                allocator: Box::new(allocator),
                entries: None,
                serving: None,
            },
        );
        Ok(())
    }

    /// Get the receive ring of a channel.
    ///
    /// The ring exists once the channel has been requested by a session.
    pub fn query_entries(&self, name: &str) -> Result<RecvEntries> {
        let channels = self.channels();
        let channel = channels
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("channel {}", name)))?;
        channel
            .entries
            .clone()
            .ok_or_else(|| Error::NotFound(format!("receive ring of channel {}", name)))
    }

    /// Find the queue pair to serve a request: an advertised one still
    /// waiting on this channel, or a new one. The flag tells whether it is new.
    fn serving_qp(daemon: &Daemon, channel: &Channel, req: &ChannelRequest) -> Result<(Qp, bool)> {
        match daemon.query_qp(&req.qp_name) {
            Ok(qp) => {
                if qp.state() != QpState::Created || !qp.recv_cq().same_as(&channel.cq) {
                    return Err(Error::Duplicate(format!(
                        "QP {} is advertised and cannot serve channel {}",
                        req.qp_name, req.channel
                    )));
                }
                Ok((qp, false))
            }
            Err(Error::NotFound(_)) => {
                let nic = daemon.query_nic(req.nic_id)?;
                let qp = Qp::create(&nic, req.config, Some(&channel.cq))?;
                daemon.register_qp(req.qp_name.clone(), qp.clone())?;
                Ok((qp, true))
            }
            Err(e) => Err(e),
        }
    }
}

impl ChannelProvider for RecvManager {
    fn create_channel(&self, daemon: &Daemon, req: ChannelRequest) -> Result<QpAttr> {
        let mut channels = self.channels();
        let channel = channels
            .get_mut(&req.channel)
            .ok_or_else(|| Error::NotFound(format!("channel {}", req.channel)))?;
        if let Some(serving) = &channel.serving {
            return Err(Error::NotReady(format!(
                "channel {} is serving QP {}",
                req.channel, serving.qp_name
            )));
        }

        let entries = match channel.entries.clone() {
            Some(entries) => entries,
            None => {
                let entries = RecvEntries::new(channel.allocator.as_mut(), req.max_msg_size)?;
                channel.entries = Some(entries.clone());
                entries
            }
        };
        if entries.max_msg_size() < req.max_msg_size {
            return Err(Error::CreationError(format!(
                "channel {} holds messages up to {} bytes, {} requested",
                req.channel,
                entries.max_msg_size(),
                req.max_msg_size
            )));
        }

        let (qp, created) = Self::serving_qp(daemon, channel, &req)?;
        let res = entries.post_all(&qp).and_then(|_| qp.connect(&req.attr));
        if let Err(e) = res {
            channel.reclaim(&qp);
            if created {
                daemon.unregister_qp(&req.qp_name);
            }
            return Err(e);
        }

        log::info!(
            "qpman: channel {} served by QP {} ({:#x})",
            req.channel,
            req.qp_name,
            qp.qp_num()
        );
        let attr = qp.my_attr();
        channel.serving = Some(Serving {
            qp_name: req.qp_name,
            qp,
            created,
        });
        Ok(attr)
    }

    fn release(&self, daemon: &Daemon, qp_name: &str) -> Result<()> {
        let mut channels = self.channels();
        let (name, channel) = channels
            .iter_mut()
            .find(|(_, ch)| matches!(&ch.serving, Some(s) if s.qp_name == qp_name))
            .ok_or_else(|| Error::NotFound(format!("channel served by QP {}", qp_name)))?;
        let Some(Serving { qp, created, .. }) = channel.serving.take() else {
            return Ok(());
        };

        channel.reclaim(&qp);
        let advertised = daemon.query_qp(qp_name).ok();
        if created && advertised.is_some_and(|a| a.qp_num() == qp.qp_num()) {
            daemon.unregister_qp(qp_name);
        }
        log::info!("qpman: channel {} released by QP {:#x}", name, qp.qp_num());
        Ok(())
    }
}
