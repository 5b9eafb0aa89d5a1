//! Stream Translation
//!
//! Backend body bytes → lines → [`BackendFrame`]s → [`CanonicalEvent`]s.
//!
//! [`CanonicalEvent`]: crate::events::CanonicalEvent

pub mod decode;
pub mod translator;

pub use decode::{decode_line, BackendFrame, LineBuffer, MAX_LINE_BYTES};
pub use translator::{is_peer_close, sleep_until, StreamOutcome, StreamTranslator};
