pub trait Serialize<'a> {
    /// Writes the serialized form of `self` into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer the header and any owned bytes are appended to.
    ///
    /// # Returns
    /// Optionally, a borrowed tail that is written after `buf` without copying.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
