use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use crate::ts::psi::{PsiTableHeader, TablePacket};
use crate::{ErrorKind, Result};

/// SDT(Service Description Table), restricted to one service descriptor per
/// service.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sdt {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub services: Vec<Service>,
}
impl Sdt {
    const TABLE_ID: u8 = 0x42;

    /// Renders the table into `packet`.
    pub fn write_to_packet(&self, packet: &mut TablePacket, discontinuity: bool) -> Result<()> {
        let mut table_data = Vec::new();
        track_io!(table_data.write_u16::<BigEndian>(self.original_network_id))?;
        track_io!(table_data.write_u8(0xFF))?; // reserved_future_use
        for service in &self.services {
            track!(service.write_to(&mut table_data))?;
        }

        let header = PsiTableHeader {
            table_id: Self::TABLE_ID,
            private_bit: true,
        };
        track!(packet.write_long_section(
            header,
            self.transport_stream_id,
            discontinuity,
            &table_data
        ))
    }
}

/// An SDT entry describing one running digital television service.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Service {
    pub service_id: u16,
    pub free_ca_mode: bool,
    pub provider_name: String,
    pub service_name: String,
}
impl Service {
    const SERVICE_DESCRIPTOR_TAG: u8 = 0x48;
    const DIGITAL_TELEVISION_SERVICE: u8 = 0x01;
    const RUNNING: u16 = 4;

    fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        let provider = self.provider_name.as_bytes();
        let service = self.service_name.as_bytes();
        let descriptor_len = 3 + provider.len() + service.len();
        track_assert!(
            descriptor_len <= 0xFF,
            ErrorKind::InvalidParameter,
            "Service names too long: {}",
            descriptor_len
        );

        track_io!(writer.write_u16::<BigEndian>(self.service_id))?;
        track_io!(writer.write_u8(0xFC))?; // reserved, no EIT
        let n = (Self::RUNNING << 13) | ((self.free_ca_mode as u16) << 12) | (descriptor_len as u16 + 2);
        track_io!(writer.write_u16::<BigEndian>(n))?;

        track_io!(writer.write_u8(Self::SERVICE_DESCRIPTOR_TAG))?;
        track_io!(writer.write_u8(descriptor_len as u8))?;
        track_io!(writer.write_u8(Self::DIGITAL_TELEVISION_SERVICE))?;
        track_io!(writer.write_u8(provider.len() as u8))?;
        track_io!(writer.write_all(provider))?;
        track_io!(writer.write_u8(service.len() as u8))?;
        track_io!(writer.write_all(service))?;
        Ok(())
    }
}
