#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Example task handlers: fixtures for tests and the `tapecore` binary's
//! `--demo` subcommand, not a product feature in their own right.

mod convert;
mod echo;

pub use convert::{ConvertAudio, ConvertAudioHandler, ConvertAudioResult};
pub use echo::{Batch, DemoHandlers, Echo, EchoResult};
