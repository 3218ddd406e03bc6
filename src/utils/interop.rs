use std::io;

use crate::error::{Error, Result};

/// Converts an errno-style return value of a post operation to a `Result`,
/// preferring the explanation given by `f` over the generic OS message.
#[inline(always)]
pub(crate) fn from_c_ret_explained(
    ret: i32,
    f: impl FnOnce(i32) -> Option<&'static str>,
) -> Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        let msg = match f(ret) {
            Some(msg) => msg.to_owned(),
            None => io::Error::from_raw_os_error(ret).to_string(),
        };
        Err(Error::PostFailed(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explained() {
        assert!(from_c_ret_explained(0, |_| None).is_ok());

        let e = from_c_ret_explained(libc::ENOMEM, |_| Some("queue is full")).unwrap_err();
        assert!(matches!(e, Error::PostFailed(ref m) if m == "queue is full"));

        let e = from_c_ret_explained(libc::EIO, |_| None).unwrap_err();
        assert!(matches!(e, Error::PostFailed(_)));
    }
}
