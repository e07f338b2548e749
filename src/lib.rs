//! MPEG-2 transport stream multiplexor.
//!
//! See [`mux::Multiplexor`] for the entry point.
//!
//! [`mux::Multiplexor`]: ./mux/struct.Multiplexor.html
extern crate byteorder;
#[macro_use]
extern crate log;
#[macro_use]
extern crate trackable;

pub use crate::error::{Error, ErrorKind};

macro_rules! track_io {
    ($expr:expr) => {
        $expr.map_err(|e: ::std::io::Error| {
            use trackable::error::ErrorKindExt;
            track!(crate::Error::from(crate::ErrorKind::Other.cause(e)))
        })
    };
}

pub mod es;
pub mod mux;
pub mod pes;
pub mod ring;
pub mod time;
pub mod ts;

mod error;
mod util;

/// This crate specific `Result` type.
pub type Result<T> = std::result::Result<T, Error>;
