//! Transport stream packet builders.
//!
//! # References
//!
//! - [MPEG transport stream](https://en.wikipedia.org/wiki/MPEG_transport_stream)
pub use self::adaptation_field::{AdaptationField, AdaptationFieldControl};
pub use self::packet::{TsHeader, TsPacket};
pub use self::psi::{PsiTableHeader, TablePacket};
pub use self::types::{ContinuityCounter, Pid, TransportScramblingControl, VersionNumber};

pub mod payload {
    //! Payloads of the packets produced by the multiplexor.

    pub use super::dit::Dit;
    pub use super::null::{Null, PcrPacket};
    pub use super::pat::{Pat, ProgramAssociation};
    pub use super::pmt::{EsInfo, Pmt};
    pub use super::sdt::{Sdt, Service};
}

mod adaptation_field;
mod dit;
mod null;
mod packet;
mod pat;
mod pmt;
mod psi;
mod sdt;
mod types;
