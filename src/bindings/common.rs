//! Inline functions of `verbs.h`, which bindgen cannot generate.

use super::private::*;
use libc::*;

/// Poll a CQ for (possibly multiple) completions.
///
/// Return the number of completions found, or a negative value on failure.
#[inline]
pub unsafe fn ibv_poll_cq(cq: *mut ibv_cq, num_entries: c_int, wc: *mut ibv_wc) -> c_int {
    match (*(*cq).context).ops.poll_cq {
        Some(poll_cq) => poll_cq(cq, num_entries, wc),
        None => -EOPNOTSUPP,
    }
}

/// Post a list of work requests to a send queue.
#[inline]
pub unsafe fn ibv_post_send(
    qp: *mut ibv_qp,
    wr: *mut ibv_send_wr,
    bad_wr: *mut *mut ibv_send_wr,
) -> c_int {
    match (*(*qp).context).ops.post_send {
        Some(post_send) => post_send(qp, wr, bad_wr),
        None => EOPNOTSUPP,
    }
}

/// Post a list of work requests to a receive queue.
#[inline]
pub unsafe fn ibv_post_recv(
    qp: *mut ibv_qp,
    wr: *mut ibv_recv_wr,
    bad_wr: *mut *mut ibv_recv_wr,
) -> c_int {
    match (*(*qp).context).ops.post_recv {
        Some(post_recv) => post_recv(qp, wr, bad_wr),
        None => EOPNOTSUPP,
    }
}
