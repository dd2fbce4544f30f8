//! `zoneio`: transport plumbing for zoned.
//!
//! One module, `frame`: a buffered reader and writer for `u32` little-endian
//! length-prefixed frames, plus the detection shortcut for plaintext HTTP
//! requests arriving on the game port.

pub mod frame;
