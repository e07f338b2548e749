use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use crate::ts::psi::{PsiTableHeader, TablePacket};
use crate::ts::Pid;
use crate::Result;

/// PAT(Program Association Table).
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pat {
    pub transport_stream_id: u16,
    pub table: Vec<ProgramAssociation>,
}
impl Pat {
    const TABLE_ID: u8 = 0;

    /// Renders the table into `packet`.
    pub fn write_to_packet(&self, packet: &mut TablePacket, discontinuity: bool) -> Result<()> {
        let mut table_data = Vec::new();
        for pa in &self.table {
            track!(pa.write_to(&mut table_data))?;
        }
        let header = PsiTableHeader {
            table_id: Self::TABLE_ID,
            private_bit: false,
        };
        track!(packet.write_long_section(
            header,
            self.transport_stream_id,
            discontinuity,
            &table_data
        ))
    }
}

/// An entry of a program association table.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramAssociation {
    pub program_num: u16,

    /// The packet identifier that contains the associated PMT.
    pub program_map_pid: Pid,
}
impl ProgramAssociation {
    fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        track_io!(writer.write_u16::<BigEndian>(self.program_num))?;
        track_io!(writer.write_all(&self.program_map_pid.to_table_field()))?;
        Ok(())
    }
}
