//! Flowagent Framing
//!
//! Turns [`RunEvent`](flowagent_config::RunEvent)s into text frames for a
//! byte stream, and back. One event becomes exactly one frame, written as
//! soon as it is produced.
//!
//! Two formats are supported:
//!
//! - [`FrameFormat::Markers`]: the line-marker protocol existing clients
//!   understand. Every frame ends with the literal `<newline>` token:
//!
//!   ```text
//!   ::result::<step>::<newline>     step started
//!   <fragment><newline>             generated text
//!   ::end::<newline>                step finished
//!   ::error::<step>::<msg>::<newline>  step (or chat turn) failed
//!   ```
//!
//!   The end marker carries no step name; decoders restore it from the last
//!   start marker. Generated text that itself contains `<newline>` or looks
//!   like a marker cannot be told apart from protocol frames.
//!
//! - [`FrameFormat::JsonLines`]: one JSON object per `\n`-terminated line,
//!   tagged by `event`. JSON escaping makes every payload unambiguous.

mod decoder;
mod error;
mod framer;

pub use decoder::{FrameDecoder, decode_all};
pub use error::FrameError;
pub use framer::{
  END_MARKER, ERROR_PREFIX, FIELD_SEPARATOR, FRAME_TERMINATOR, FrameFormat, RESULT_PREFIX,
  StreamFramer, is_frameable_name,
};
