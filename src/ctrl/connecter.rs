use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use super::proto::*;
use crate::error::{Error, Result};
use crate::rdma::mr::MrAttr;
use crate::rdma::qp::{Qp, QpAttr, QpConfig, QpState};

/// Client session with a remote registry [`Daemon`](super::Daemon).
///
/// Creating a session does not connect. The TCP stream is opened on first
/// use and reused across calls; a stream that fails mid-request is dropped
/// and the next call reconnects.
///
/// Every request, including connecting, is bounded by the session timeout
/// and fails with [`Error::Timeout`] when the daemon does not answer in time.
pub struct Connecter {
    addr: String,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl Connecter {
    /// Default bound of one request.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Record the remote control endpoint, e.g. `"10.0.0.2:8888"`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Self::DEFAULT_TIMEOUT,
            stream: None,
        }
    }

    /// Set the bound of one request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the remote control endpoint.
    #[inline]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn resolve(&self) -> Result<SocketAddr> {
        self.addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::NotFound(format!("address {}", self.addr)))
    }

    /// Open a stream whose connect, reads and writes are bounded by `timeout`.
    fn open(&self, timeout: Duration) -> Result<TcpStream> {
        let timeout = timeout.max(MIN_TIMEOUT);
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        set_timeouts(&stream, timeout)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn rpc(&mut self, req: &Request) -> Result<Response> {
        let res = self.try_rpc(req);
        if res.is_err() {
            self.stream = None;
        }
        expired_as_timeout(res, self.timeout)?.into_result()
    }

    fn try_rpc(&mut self, req: &Request) -> Result<Response> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.open(self.timeout)?,
        };
        let stream = self.stream.insert(stream);
        stream_write(&mut *stream, req)?;
        stream_read(&mut *stream)
    }

    /// Wait until the remote daemon answers, trying up to `retry` times.
    ///
    /// `timeout_us` is the total budget in microseconds, divided evenly
    /// across the attempts.
    pub fn wait_ready(&mut self, timeout_us: u64, retry: u32) -> Result<()> {
        let retry = retry.max(1);
        let total = Duration::from_micros(timeout_us);
        let per_attempt = total / retry;

        for attempt in 0..retry {
            let start = quanta::Instant::now();
            match self.heartbeat(per_attempt) {
                Ok(()) => return Ok(()),
                Err(e) => log::debug!(
                    "qpman: {} not ready (attempt {}/{}): {}",
                    self.addr,
                    attempt + 1,
                    retry,
                    e
                ),
            }
            if let Some(rest) = per_attempt.checked_sub(start.elapsed()) {
                thread::sleep(rest);
            }
        }
        Err(Error::Timeout(total))
    }

    fn heartbeat(&mut self, timeout: Duration) -> Result<()> {
        let timeout = timeout.max(MIN_TIMEOUT);
        if let Some(stream) = &self.stream {
            set_timeouts(stream, timeout)?;
        } else {
            let stream = expired_as_timeout(self.open(timeout), timeout)?;
            self.stream = Some(stream);
        }

        let res = self.try_rpc(&Request::Heartbeat);
        if res.is_err() {
            self.stream = None;
        }
        if let Some(stream) = &self.stream {
            set_timeouts(stream, self.timeout)?;
        }
        match expired_as_timeout(res, timeout)?.into_result()? {
            Response::Ok => Ok(()),
            other => Err(Error::Protocol(format!("unexpected response {:?}", other))),
        }
    }

    /// Fetch the attributes of a queue pair advertised on the remote daemon.
    pub fn fetch_qp_attr(&mut self, name: &str) -> Result<QpAttr> {
        let req = Request::FetchQpAttr {
            name: name.to_owned(),
        };
        match self.rpc(&req)? {
            Response::QpAttr(attr) => Ok(attr),
            other => Err(Error::Protocol(format!("unexpected response {:?}", other))),
        }
    }

    /// Fetch the attributes of a memory registration on the remote daemon.
    pub fn fetch_remote_mr(&mut self, id: u64) -> Result<MrAttr> {
        match self.rpc(&Request::FetchMrAttr { id })? {
            Response::MrAttr(attr) => Ok(attr),
            other => Err(Error::Protocol(format!("unexpected response {:?}", other))),
        }
    }

    /// Fetch the addressing information of a NIC on the remote daemon.
    pub fn fetch_nic_attr(&mut self, id: u64) -> Result<NicAttr> {
        match self.rpc(&Request::FetchNicAttr { id })? {
            Response::NicAttr(attr) => Ok(attr),
            other => Err(Error::Protocol(format!("unexpected response {:?}", other))),
        }
    }

    /// Check that the remote queue pair is reachable through the remote NIC.
    fn check_remote(&mut self, nic_id: u64, remote: &QpAttr) -> Result<()> {
        let nic = self.fetch_nic_attr(nic_id)?;
        if !nic.active {
            return Err(Error::ConnectError(format!(
                "remote NIC {} is not active",
                nic_id
            )));
        }
        if nic.gid != remote.gid() || nic.lid != remote.lid {
            return Err(Error::ConnectError(format!(
                "remote QP {:#x} is not on NIC {} (GID {}, LID {})",
                remote.qpn, nic_id, nic.gid, nic.lid
            )));
        }
        Ok(())
    }

    /// Ask the remote daemon for a receive channel and connect `qp` to the
    /// queue pair serving it.
    ///
    /// `qp` must be in [`QpState::Created`]. The remote queue pair is
    /// advertised as `qp_name`, created on remote NIC `remote_nic_id` with
    /// `config` unless one is advertised already.
    ///
    /// Either every step succeeds or none takes effect remotely: a channel
    /// materialized before a failure is released again. A failure before the
    /// local connect leaves `qp` in CREATED; a failed local connect leaves it
    /// in ERROR.
    pub fn create_and_connect(
        &mut self,
        qp_name: &str,
        channel: &str,
        max_msg_size: u32,
        qp: &Qp,
        remote_nic_id: u64,
        config: &QpConfig,
    ) -> Result<()> {
        match qp.state() {
            QpState::Created => {}
            QpState::Rtr | QpState::Rts => return Err(Error::AlreadyConnected),
            QpState::Error => {
                return Err(Error::NotReady(
                    "queue pair is in ERROR state and must be recreated".to_owned(),
                ))
            }
        }

        let req = Request::CreateRcChannel {
            qp_name: qp_name.to_owned(),
            channel: channel.to_owned(),
            max_msg_size,
            attr: qp.my_attr(),
            config: *config,
            nic_id: remote_nic_id,
        };
        let remote = match self.rpc(&req)? {
            Response::QpAttr(attr) => attr,
            other => {
                self.rollback(qp_name);
                return Err(Error::Protocol(format!("unexpected response {:?}", other)));
            }
        };

        let res = self
            .check_remote(remote_nic_id, &remote)
            .and_then(|_| qp.connect(&remote));
        if let Err(e) = res {
            self.rollback(qp_name);
            return Err(e);
        }
        log::debug!(
            "qpman: QP {:#x} connected to {}:{} ({:#x})",
            qp.qp_num(),
            self.addr,
            qp_name,
            remote.qpn
        );
        Ok(())
    }

    fn rollback(&mut self, qp_name: &str) {
        let req = Request::Release {
            qp_name: qp_name.to_owned(),
        };
        if let Err(e) = self.rpc(&req) {
            log::warn!(
                "qpman: cannot release {} on {} after failure: {}",
                qp_name,
                self.addr,
                e
            );
        }
    }
}

/// Socket timeouts must be non-zero.
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

fn set_timeouts(stream: &TcpStream, timeout: Duration) -> io::Result<()> {
    let timeout = timeout.max(MIN_TIMEOUT);
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))
}

/// Report expired socket timeouts as [`Error::Timeout`].
fn expired_as_timeout<T>(res: Result<T>, timeout: Duration) -> Result<T> {
    match res {
        Err(Error::Io(e))
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
        {
            Err(Error::Timeout(timeout))
        }
        res => res,
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn wait_ready_times_out_within_budget() {
        // Nothing listens on a port just released by the OS.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let mut conn = Connecter::new(addr.to_string());

        let start = quanta::Instant::now();
        assert!(matches!(
            conn.wait_ready(100_000, 4),
            Err(Error::Timeout(_))
        ));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn wait_ready_bounded_by_silent_daemon() {
        // Connections complete in the backlog, and nothing ever replies.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut conn = Connecter::new(listener.local_addr().unwrap().to_string());

        let start = quanta::Instant::now();
        assert!(matches!(
            conn.wait_ready(100_000, 2),
            Err(Error::Timeout(_))
        ));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn rpc_bounded_by_session_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let timeout = Duration::from_millis(100);
        let mut conn =
            Connecter::new(listener.local_addr().unwrap().to_string()).with_timeout(timeout);

        let start = quanta::Instant::now();
        assert!(matches!(
            conn.fetch_qp_attr("qp0"),
            Err(Error::Timeout(t)) if t == timeout
        ));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn unresolvable_address_fails() {
        let mut conn = Connecter::new("not an address");
        assert!(conn.fetch_qp_attr("qp0").is_err());
    }
}
