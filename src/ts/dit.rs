use crate::ts::psi::{PsiTableHeader, TablePacket};
use crate::Result;

/// DIT(Discontinuity Information Table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dit {
    pub transition_flag: bool,
}
impl Dit {
    const TABLE_ID: u8 = 0x7E;

    /// Renders the table into `packet`.
    ///
    /// DIT packets never carry an adaptation field.
    pub fn write_to_packet(&self, packet: &mut TablePacket) -> Result<()> {
        let header = PsiTableHeader {
            table_id: Self::TABLE_ID,
            private_bit: true,
        };
        track!(packet.write_short_section(header, false, &[self.flag_byte()]))
    }

    /// Sets the transition flag of an already rendered DIT packet.
    pub fn patch_packet(&self, packet: &mut TablePacket) {
        packet.patch_table_data(0, self.flag_byte());
    }

    fn flag_byte(self) -> u8 {
        ((self.transition_flag as u8) << 7) | 0x7F
    }
}
