#![allow(unused_macros)]

/// Helper macro for locking items, surfacing poisoning as [`crate::Error::LockError`]
///
/// ```rust, ignore
///  let mut writer = lock!(self.writer)?;
///  writer.write_all(text.as_bytes())?;
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().map_err(|_| crate::Error::LockError)
    };
}
