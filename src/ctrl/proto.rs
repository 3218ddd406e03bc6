//! Control-plane wire protocol.
//!
//! Every message is a JSON document prefixed by its length as a little-endian
//! `u64`. A connection carries any number of request/response pairs.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rdma::gid::Gid;
use crate::rdma::mr::MrAttr;
use crate::rdma::qp::{QpAttr, QpConfig};
use crate::rdma::types::*;

/// Largest frame accepted from a peer.
pub(crate) const MAX_FRAME_LEN: u64 = 1 << 20;

/// Request sent by a connection session to a registry daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Request {
    Heartbeat,
    FetchQpAttr {
        name: String,
    },
    FetchMrAttr {
        id: u64,
    },
    FetchNicAttr {
        id: u64,
    },
    CreateRcChannel {
        qp_name: String,
        channel: String,
        max_msg_size: u32,
        attr: QpAttr,
        config: QpConfig,
        nic_id: u64,
    },
    Release {
        qp_name: String,
    },
}

/// Category of a failed request, preserved across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ErrKind {
    NotFound,
    Duplicate,
    NotReady,
    Connect,
    Other,
}

/// Response sent by a registry daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Response {
    Ok,
    QpAttr(QpAttr),
    MrAttr(MrAttr),
    NicAttr(NicAttr),
    Err { kind: ErrKind, msg: String },
}

impl Response {
    pub fn from_error(e: &Error) -> Self {
        let kind = match e {
            Error::NotFound(_) => ErrKind::NotFound,
            Error::Duplicate(_) => ErrKind::Duplicate,
            Error::NotReady(_) => ErrKind::NotReady,
            Error::ConnectError(_) | Error::AlreadyConnected | Error::LinkDown(_) => {
                ErrKind::Connect
            }
            _ => ErrKind::Other,
        };
        Response::Err {
            kind,
            msg: e.to_string(),
        }
    }

    /// Turn an error response into the error it describes.
    pub fn into_result(self) -> Result<Self> {
        match self {
            Response::Err { kind, msg } => Err(match kind {
                ErrKind::NotFound => Error::NotFound(msg),
                ErrKind::Duplicate => Error::Duplicate(msg),
                ErrKind::NotReady => Error::NotReady(msg),
                ErrKind::Connect => Error::ConnectError(msg),
                ErrKind::Other => Error::Protocol(format!("remote error: {}", msg)),
            }),
            resp => Ok(resp),
        }
    }
}

/// Addressing information of a NIC registered on a remote daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicAttr {
    pub gid: Gid,
    pub lid: Lid,
    pub port_num: PortNum,
    pub active: bool,
}

pub(crate) fn stream_write(stream: &mut impl Write, msg: &impl Serialize) -> Result<()> {
    let buf = serde_json::to_vec(msg)?;
    stream.write_all(&(buf.len() as u64).to_le_bytes())?;
    stream.write_all(&buf)?;
    stream.flush()?;
    Ok(())
}

pub(crate) fn stream_read<T: for<'de> Deserialize<'de>>(stream: &mut impl Read) -> Result<T> {
    let mut len = [0; std::mem::size_of::<u64>()];
    stream.read_exact(&mut len)?;
    let len = u64::from_le_bytes(len);
    if len > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut buf = vec![0; len as usize];
    stream.read_exact(&mut buf)?;
    Ok(serde_json::from_slice(&buf)?)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn framed_request() {
        let mut buf = Vec::new();
        let req = Request::FetchQpAttr {
            name: "qp0".to_owned(),
        };
        stream_write(&mut buf, &req).unwrap();
        assert_eq!(
            u64::from_le_bytes(buf[..8].try_into().unwrap()) as usize,
            buf.len() - 8
        );

        match stream_read::<Request>(&mut Cursor::new(buf)).unwrap() {
            Request::FetchQpAttr { name } => assert_eq!(name, "qp0"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut buf = (MAX_FRAME_LEN + 1).to_le_bytes().to_vec();
        buf.extend_from_slice(b"{}");
        assert!(matches!(
            stream_read::<Response>(&mut Cursor::new(buf)),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn truncated_frame_is_io_error() {
        let mut buf = 100u64.to_le_bytes().to_vec();
        buf.extend_from_slice(b"{\"Ok\"");
        assert!(matches!(
            stream_read::<Response>(&mut Cursor::new(buf)),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn error_kind_survives() {
        let resp = Response::from_error(&Error::NotFound("mr 7".to_owned()));
        assert!(matches!(resp.into_result(), Err(Error::NotFound(_))));
        let resp = Response::from_error(&Error::Duplicate("qp0".to_owned()));
        assert!(matches!(resp.into_result(), Err(Error::Duplicate(_))));
        assert!(matches!(Response::Ok.into_result(), Ok(Response::Ok)));
    }
}
