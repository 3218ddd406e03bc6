/// Provide interoperability with errno-style return values.
pub(crate) mod interop;
