use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use crate::es::StreamType;
use crate::ts::psi::{PsiTableHeader, TablePacket};
use crate::ts::Pid;
use crate::{ErrorKind, Result};

/// Program Map Table.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pmt {
    pub program_num: u16,

    /// The packet identifier that contains the program clock reference (PCR).
    pub pcr_pid: Pid,

    /// Raw program level descriptors.
    pub program_info: Vec<u8>,

    pub es_info: Vec<EsInfo>,
}
impl Pmt {
    const TABLE_ID: u8 = 2;

    /// Renders the table into `packet`.
    pub fn write_to_packet(&self, packet: &mut TablePacket, discontinuity: bool) -> Result<()> {
        let mut table_data = Vec::new();
        track_io!(table_data.write_all(&self.pcr_pid.to_table_field()))?;
        track!(write_descriptors(&mut table_data, &self.program_info))?;
        for info in &self.es_info {
            track!(info.write_to(&mut table_data))?;
        }

        let header = PsiTableHeader {
            table_id: Self::TABLE_ID,
            private_bit: false,
        };
        track!(packet.write_long_section(header, self.program_num, discontinuity, &table_data))
    }
}

/// Elementary stream information.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EsInfo {
    pub stream_type: StreamType,

    /// The packet identifier that contains the stream type data.
    pub elementary_pid: Pid,

    /// Raw stream level descriptors.
    pub descriptors: Vec<u8>,
}
impl EsInfo {
    fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        track_io!(writer.write_u8(self.stream_type as u8))?;
        track_io!(writer.write_all(&self.elementary_pid.to_table_field()))?;
        track!(write_descriptors(writer, &self.descriptors))?;
        Ok(())
    }
}

fn write_descriptors<W: Write>(mut writer: W, descriptors: &[u8]) -> Result<()> {
    track_assert!(
        descriptors.len() <= 0b0000_0011_1111_1111,
        ErrorKind::InvalidParameter,
        "Descriptors too large: {}",
        descriptors.len()
    );
    let n = 0b1111_0000_0000_0000 | descriptors.len() as u16;
    track_io!(writer.write_u16::<BigEndian>(n))?;
    track_io!(writer.write_all(descriptors))?;
    Ok(())
}
