use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::proto::*;
use super::registry::Registry;
use crate::config::DaemonConfig;
use crate::error::{Error, Result};
use crate::rdma::mr::Mr;
use crate::rdma::nic::Nic;
use crate::rdma::qp::{Qp, QpAttr, QpConfig};

/// Parameters of a receive channel requested by a remote session.
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    /// Name to advertise the serving queue pair under.
    pub qp_name: String,
    /// Name of the receive channel.
    pub channel: String,
    /// Largest message the channel must accept.
    pub max_msg_size: u32,
    /// Attributes of the requesting queue pair.
    pub attr: QpAttr,
    /// Configuration of the serving queue pair, if one is created.
    pub config: QpConfig,
    /// Registered NIC to create the serving queue pair on.
    pub nic_id: u64,
}

/// Materializes receive channels on behalf of a [`Daemon`].
pub trait ChannelProvider: Send + Sync {
    /// Bring up a queue pair serving `req.channel`, connected to `req.attr`,
    /// and advertise it as `req.qp_name`. Return its attributes.
    fn create_channel(&self, daemon: &Daemon, req: ChannelRequest) -> Result<QpAttr>;

    /// Withdraw the queue pair advertised as `qp_name` and free its channel.
    fn release(&self, daemon: &Daemon, qp_name: &str) -> Result<()>;
}

/// Open control connections and their handler threads.
type Conns = Arc<Mutex<Vec<(TcpStream, JoinHandle<()>)>>>;

struct Running {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    listener: JoinHandle<()>,
    conns: Conns,
}

struct DaemonInner {
    host: String,
    port: u16,
    nics: Registry<u64, Nic>,
    mrs: Registry<u64, Mr>,
    qps: Registry<String, Qp>,
    provider: RwLock<Option<Arc<dyn ChannelProvider>>>,
    running: Mutex<Option<Running>>,
}

impl DaemonInner {
    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DaemonInner {
    fn drop(&mut self) {
        if let Some(running) = self.running().take() {
            running.stop.store(true, Ordering::Release);
            for (conn, _) in lock(&running.conns).iter() {
                let _ = conn.shutdown(Shutdown::Both);
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry daemon.
///
/// Keeps three registries (NICs and memory registrations by numeric ID,
/// queue pairs by name) and serves them to remote
/// [`Connecter`](super::Connecter)s over TCP. Requests to create receive
/// channels are delegated to the installed [`ChannelProvider`].
///
/// Cloning shares the daemon.
#[derive(Clone)]
pub struct Daemon {
    inner: Arc<DaemonInner>,
}

impl Daemon {
    /// How long the accept loop sleeps when no connection is pending.
    const ACCEPT_INTERVAL: Duration = Duration::from_millis(5);

    /// Create a daemon that will listen on `host:port`. Port 0 picks any
    /// free port, see [`Self::local_addr`].
    pub fn new(port: u16, host: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(DaemonInner {
                host: host.into(),
                port,
                nics: Registry::new("NIC"),
                mrs: Registry::new("MR"),
                qps: Registry::new("QP"),
                provider: RwLock::new(None),
                running: Mutex::new(None),
            }),
        }
    }

    /// Create a daemon from configuration.
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(config.port, config.host.clone())
    }

    /// Install the handler of channel requests, replacing any previous one.
    pub fn set_channel_provider(&self, provider: Arc<dyn ChannelProvider>) {
        *self
            .inner
            .provider
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(provider);
    }

    fn provider(&self) -> Result<Arc<dyn ChannelProvider>> {
        self.inner
            .provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::NotReady("daemon serves no receive channels".to_owned()))
    }

    /// Start accepting control connections in the background.
    ///
    /// Fails if the daemon is already running or the address cannot be bound.
    pub fn start(&self) -> Result<()> {
        let mut running = self.inner.running();
        if running.is_some() {
            return Err(Error::CreationError("daemon already running".to_owned()));
        }

        let listener = TcpListener::bind((self.inner.host.as_str(), self.inner.port))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let stop = Arc::new(AtomicBool::new(false));
        let conns = Arc::new(Mutex::new(Vec::new()));
        let handle = {
            let stop = stop.clone();
            let conns = conns.clone();
            let daemon = Arc::downgrade(&self.inner);
            thread::Builder::new()
                .name(format!("qpman-daemon-{}", addr.port()))
                .spawn(move || Self::accept_loop(listener, daemon, stop, conns))?
        };

        log::info!("qpman: daemon listening on {}", addr);
        *running = Some(Running {
            addr,
            stop,
            listener: handle,
            conns,
        });
        Ok(())
    }

    /// Stop accepting connections and close existing ones. No-op if not
    /// running. A stopped daemon can be started again.
    pub fn stop(&self) {
        let Some(running) = self.inner.running().take() else {
            return;
        };

        running.stop.store(true, Ordering::Release);
        if running.listener.join().is_err() {
            log::error!("qpman: daemon accept loop panicked");
        }
        let conns = std::mem::take(&mut *lock(&running.conns));
        for (conn, handle) in conns {
            let _ = conn.shutdown(Shutdown::Both);
            if handle.join().is_err() {
                log::error!("qpman: daemon connection handler panicked");
            }
        }
        log::info!("qpman: daemon on {} stopped", running.addr);
    }

    /// Check whether the daemon is accepting connections.
    pub fn is_running(&self) -> bool {
        self.inner.running().is_some()
    }

    /// Get the bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.running().as_ref().map(|r| r.addr)
    }

    /// Get the number of control connections not yet reaped.
    pub(crate) fn connection_count(&self) -> usize {
        self.inner
            .running()
            .as_ref()
            .map_or(0, |r| lock(&r.conns).len())
    }

    /// Join the handlers of closed connections and drop their streams.
    fn reap(conns: &Conns) {
        let finished = {
            let mut conns = lock(conns);
            let (finished, open) = conns.drain(..).partition(|(_, h)| h.is_finished());
            *conns = open;
            finished
        };
        for (_, handle) in finished {
            if handle.join().is_err() {
                log::error!("qpman: daemon connection handler panicked");
            }
        }
    }

    fn accept_loop(
        listener: TcpListener,
        daemon: Weak<DaemonInner>,
        stop: Arc<AtomicBool>,
        conns: Conns,
    ) {
        while !stop.load(Ordering::Acquire) {
            Self::reap(&conns);
            match listener.accept() {
                Ok((stream, peer)) => {
                    log::info!("qpman: daemon accepted {}", peer);
                    let registered = stream
                        .set_nonblocking(false)
                        .and_then(|_| stream.try_clone());
                    let conn = match registered {
                        Ok(conn) => conn,
                        Err(e) => {
                            log::error!("qpman: cannot set up connection from {}: {}", peer, e);
                            continue;
                        }
                    };
                    let daemon = daemon.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("qpman-conn-{}", peer))
                        .spawn(move || Self::serve(stream, peer, daemon));
                    match spawned {
                        Ok(handle) => lock(&conns).push((conn, handle)),
                        Err(e) => log::error!("qpman: cannot spawn handler for {}: {}", peer, e),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(Self::ACCEPT_INTERVAL)
                }
                Err(e) => {
                    log::error!("qpman: daemon accept error: {}", e);
                    thread::sleep(Self::ACCEPT_INTERVAL);
                }
            }
            if daemon.strong_count() == 0 {
                break;
            }
        }
    }

    fn serve(mut stream: TcpStream, peer: SocketAddr, daemon: Weak<DaemonInner>) {
        loop {
            let req = match stream_read::<Request>(&mut stream) {
                Ok(req) => req,
                Err(Error::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    log::debug!("qpman: connection from {} failed: {}", peer, e);
                    break;
                }
            };
            let Some(inner) = daemon.upgrade() else {
                break;
            };

            let resp = Daemon { inner }.handle(req);
            if let Err(e) = stream_write(&mut stream, &resp) {
                log::error!("qpman: cannot respond to {}: {}", peer, e);
                break;
            }
        }
        log::debug!("qpman: connection from {} closed", peer);
    }

    fn handle(&self, req: Request) -> Response {
        let res = match req {
            Request::Heartbeat => Ok(Response::Ok),
            Request::FetchQpAttr { name } => self
                .query_qp(&name)
                .map(|qp| Response::QpAttr(qp.my_attr())),
            Request::FetchMrAttr { id } => self.query_mr(id).map(|mr| Response::MrAttr(mr.attr())),
            Request::FetchNicAttr { id } => self.query_nic(id).map(|nic| {
                Response::NicAttr(NicAttr {
                    gid: nic.gid(),
                    lid: nic.lid(),
                    port_num: nic.port_num(),
                    active: nic.is_active().is_ok(),
                })
            }),
            Request::CreateRcChannel {
                qp_name,
                channel,
                max_msg_size,
                attr,
                config,
                nic_id,
            } => self.provider().and_then(|provider| {
                let req = ChannelRequest {
                    qp_name,
                    channel,
                    max_msg_size,
                    attr,
                    config,
                    nic_id,
                };
                provider.create_channel(self, req).map(Response::QpAttr)
            }),
            Request::Release { qp_name } => self
                .provider()
                .and_then(|provider| provider.release(self, &qp_name))
                .map(|_| Response::Ok),
        };

        res.unwrap_or_else(|e| {
            log::warn!("qpman: rejected control request: {}", e);
            Response::from_error(&e)
        })
    }

    /// Register a NIC under a numeric ID.
    pub fn register_nic(&self, id: u64, nic: Nic) -> Result<()> {
        self.inner.nics.insert(id, nic)
    }

    /// Register a memory registration under a numeric ID.
    pub fn register_mr(&self, id: u64, mr: Mr) -> Result<()> {
        self.inner.mrs.insert(id, mr)
    }

    /// Advertise a queue pair for remote discovery.
    pub fn register_qp(&self, name: impl Into<String>, qp: Qp) -> Result<()> {
        self.inner.qps.insert(name.into(), qp)
    }

    /// Withdraw an advertised queue pair.
    pub fn unregister_qp(&self, name: &str) -> Option<Qp> {
        self.inner.qps.remove(&name.to_owned())
    }

    pub fn query_nic(&self, id: u64) -> Result<Nic> {
        self.inner.nics.get(&id)
    }

    pub fn query_mr(&self, id: u64) -> Result<Mr> {
        self.inner.mrs.get(&id)
    }

    pub fn query_qp(&self, name: &str) -> Result<Qp> {
        self.inner.qps.get(&name.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_twice_rejected() {
        let daemon = Daemon::new(0, "127.0.0.1");
        daemon.start().unwrap();
        let addr = daemon.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(matches!(daemon.start(), Err(Error::CreationError(_))));
        assert_eq!(daemon.local_addr(), Some(addr));

        daemon.stop();
        daemon.stop();
        assert!(!daemon.is_running());
        assert!(daemon.local_addr().is_none());

        daemon.start().unwrap();
        assert!(daemon.is_running());
        daemon.stop();
    }

    #[test]
    fn serves_heartbeat_and_not_found() {
        let daemon = Daemon::new(0, "127.0.0.1");
        daemon.start().unwrap();
        let mut stream = TcpStream::connect(daemon.local_addr().unwrap()).unwrap();

        stream_write(&mut stream, &Request::Heartbeat).unwrap();
        let resp: Response = stream_read(&mut stream).unwrap();
        assert!(matches!(resp, Response::Ok));

        stream_write(&mut stream, &Request::FetchMrAttr { id: 9 }).unwrap();
        let resp: Response = stream_read(&mut stream).unwrap();
        assert!(matches!(resp.into_result(), Err(Error::NotFound(_))));

        let req = Request::Release {
            qp_name: "x".to_owned(),
        };
        stream_write(&mut stream, &req).unwrap();
        let resp: Response = stream_read(&mut stream).unwrap();
        assert!(matches!(resp.into_result(), Err(Error::NotReady(_))));

        daemon.stop();
    }

    #[test]
    fn closed_connections_are_reaped() {
        let daemon = Daemon::new(0, "127.0.0.1");
        daemon.start().unwrap();
        let addr = daemon.local_addr().unwrap();

        for _ in 0..200 {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream_write(&mut stream, &Request::Heartbeat).unwrap();
            let resp: Response = stream_read(&mut stream).unwrap();
            assert!(matches!(resp, Response::Ok));
        }

        let start = quanta::Instant::now();
        while daemon.connection_count() > 0 {
            assert!(
                start.elapsed() < Duration::from_secs(2),
                "{} connections left",
                daemon.connection_count()
            );
            thread::sleep(Duration::from_millis(10));
        }
        daemon.stop();
    }
}
