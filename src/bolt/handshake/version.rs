//! Bolt protocol version definitions.

use std::fmt;

/// Bolt protocol versions spoken by this client.
///
/// On the wire a version is a 4-byte big-endian word laid out as
/// `[reserved, range, minor, major]`, i.e. `range << 16 | minor << 8 | major`.
/// A non-zero range in a proposal asks for any minor version from `minor`
/// down to `minor - range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoltVersion {
    /// Bolt 5.1: LOGON/LOGOFF split from HELLO
    V5_1,
    /// Bolt 5.2
    V5_2,
    /// Bolt 5.3: bolt_agent in HELLO
    V5_3,
    /// Bolt 5.4: TELEMETRY (never sent by this client)
    V5_4,
}

impl BoltVersion {
    /// All supported versions in order of preference (newest first).
    pub const ALL: [BoltVersion; 4] = [
        BoltVersion::V5_4,
        BoltVersion::V5_3,
        BoltVersion::V5_2,
        BoltVersion::V5_1,
    ];

    /// Raw value the server answers with when it accepts none of the proposals.
    pub const NO_VERSION: u32 = 0;

    /// Raw value seen when the peer is an HTTP server ("HTTP" in ASCII).
    pub const HTTP: u32 = 0x4854_5450;

    /// Major version number.
    pub fn major(self) -> u8 {
        5
    }

    /// Minor version number.
    pub fn minor(self) -> u8 {
        match self {
            BoltVersion::V5_1 => 1,
            BoltVersion::V5_2 => 2,
            BoltVersion::V5_3 => 3,
            BoltVersion::V5_4 => 4,
        }
    }

    /// Parse a version word as answered by the server.
    ///
    /// An answer names one exact version, so the range and reserved bytes
    /// must be zero.
    pub fn from_raw(raw: u32) -> Option<Self> {
        if raw >> 16 != 0 {
            return None;
        }
        let major = raw & 0xFF;
        let minor = (raw >> 8) & 0xFF;
        match (major, minor) {
            (5, 1) => Some(BoltVersion::V5_1),
            (5, 2) => Some(BoltVersion::V5_2),
            (5, 3) => Some(BoltVersion::V5_3),
            (5, 4) => Some(BoltVersion::V5_4),
            _ => None,
        }
    }

    /// Exact version word, with range 0.
    pub fn to_raw(self) -> u32 {
        ((self.minor() as u32) << 8) | self.major() as u32
    }

    /// Version word proposing this version and `range` minor versions below it.
    pub fn range_proposal(self, range: u8) -> u32 {
        ((range as u32) << 16) | self.to_raw()
    }

    /// Whether HELLO carries the `bolt_agent` map.
    pub fn supports_bolt_agent(self) -> bool {
        self >= BoltVersion::V5_3
    }
}

/// Human readable `major.minor` for any raw version word.
pub fn describe_raw(raw: u32) -> String {
    format!("{}.{}", raw & 0xFF, (raw >> 8) & 0xFF)
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_raw_encoding() {
        assert_eq!(BoltVersion::V5_4.to_raw(), 0x0000_0405);
        assert_eq!(BoltVersion::V5_1.to_raw(), 0x0000_0105);
        assert_eq!(BoltVersion::V5_4.range_proposal(3), 0x0003_0405);
    }

    #[test]
    fn test_version_from_raw() {
        assert_eq!(BoltVersion::from_raw(0x0000_0405), Some(BoltVersion::V5_4));
        assert_eq!(BoltVersion::from_raw(0x0000_0205), Some(BoltVersion::V5_2));
        assert_eq!(BoltVersion::from_raw(0x0000_0005), None);
        assert_eq!(BoltVersion::from_raw(0x0000_0404), None);
        assert_eq!(BoltVersion::from_raw(BoltVersion::NO_VERSION), None);
        assert_eq!(BoltVersion::from_raw(BoltVersion::HTTP), None);
        assert_eq!(BoltVersion::from_raw(0x00FF_0504), None);
        assert_eq!(BoltVersion::from_raw(0x0003_0405), None);
        assert_eq!(BoltVersion::from_raw(0x0100_0405), None);
    }

    #[test]
    fn test_http_is_major_80_minor_84() {
        assert_eq!(describe_raw(BoltVersion::HTTP), "80.84");
    }

    #[test]
    fn test_version_ordering_and_features() {
        assert!(BoltVersion::V5_4 > BoltVersion::V5_3);
        assert!(BoltVersion::V5_2 > BoltVersion::V5_1);
        assert!(!BoltVersion::V5_2.supports_bolt_agent());
        assert!(BoltVersion::V5_3.supports_bolt_agent());
    }

    #[test]
    fn test_version_display() {
        assert_eq!(BoltVersion::V5_1.to_string(), "5.1");
        assert_eq!(BoltVersion::V5_4.to_string(), "5.4");
    }
}
