use crate::{ErrorKind, Result};

/// Packet Identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(u16);
impl Pid {
    /// Maximum PID value.
    pub const MAX: u16 = (1 << 13) - 1;

    /// PID of the Program Association Table (PAT) packet.
    pub const PAT: Pid = Pid(0);

    /// PID of the Service Description Table (SDT) packet.
    pub const SDT: Pid = Pid(0x11);

    /// PID of the Discontinuity Information Table (DIT) packet.
    pub const DIT: Pid = Pid(0x1E);

    /// PID of the null packet.
    pub const NULL: Pid = Pid(0x1FFF);

    /// Makes a new `Pid` instance.
    ///
    /// # Errors
    ///
    /// If `pid` exceeds `Pid::MAX`, it will return an `ErrorKind::InvalidParameter` error.
    pub fn new(pid: u16) -> Result<Self> {
        track_assert!(
            pid <= Self::MAX,
            ErrorKind::InvalidParameter,
            "Too large PID: {}",
            pid
        );
        Ok(Pid(pid))
    }

    /// Returns the value of the `Pid`.
    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the 13-bit PID prefixed with three reserved `1` bits, as it
    /// appears inside PSI tables.
    pub(crate) fn to_table_field(self) -> [u8; 2] {
        (0xE000 | self.0).to_be_bytes()
    }
}
impl From<u8> for Pid {
    fn from(f: u8) -> Self {
        Pid(u16::from(f))
    }
}

/// Continuity counter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContinuityCounter(u8);
impl ContinuityCounter {
    /// Makes a new `ContinuityCounter` instance that has the value `0`.
    pub fn new() -> Self {
        ContinuityCounter(0)
    }

    /// Makes a new `ContinuityCounter` instance with the given value.
    ///
    /// # Errors
    ///
    /// If `n` exceeds `0b1111`, it will return an `ErrorKind::InvalidParameter` error.
    pub fn from_u8(n: u8) -> Result<Self> {
        track_assert!(n <= 0b1111, ErrorKind::InvalidParameter);
        Ok(ContinuityCounter(n))
    }

    /// Returns the value of the counter.
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Advances the counter (modulo 16) and returns the new value.
    pub fn increment(&mut self) -> Self {
        self.0 = (self.0 + 1) & 0b1111;
        *self
    }
}

/// Table version number.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionNumber(u8);
impl VersionNumber {
    /// Makes a new `VersionNumber` instance that has the value `0`.
    pub fn new() -> Self {
        VersionNumber(0)
    }

    /// Returns the value of the version number.
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Advances the version number (modulo 32) and returns the new value.
    pub fn increment(&mut self) -> Self {
        self.0 = (self.0 + 1) & 0b1_1111;
        *self
    }
}

/// Transport scrambling control.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportScramblingControl {
    NotScrambled = 0b00,
    ScrambledWithEvenKey = 0b10,
    ScrambledWithOddKey = 0b11,
}
impl TransportScramblingControl {
    /// Picks the control value for a payload with the given scrambling state.
    ///
    /// `odd_parity` selects the odd key.
    pub fn new(scrambled: bool, odd_parity: bool) -> Self {
        match (scrambled, odd_parity) {
            (false, _) => TransportScramblingControl::NotScrambled,
            (true, false) => TransportScramblingControl::ScrambledWithEvenKey,
            (true, true) => TransportScramblingControl::ScrambledWithOddKey,
        }
    }
}
