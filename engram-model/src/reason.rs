use serde::{Deserialize, Serialize};

/// Change-reason bitfield carried on raw journal records.
///
/// The bit layout mirrors the NTFS USN reason mask so native records pass
/// through untranslated; emulated backends synthesize the same bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReasonFlags(pub u32);

impl ReasonFlags {
    pub const DATA_OVERWRITE: ReasonFlags = ReasonFlags(0x0000_0001);
    pub const DATA_EXTEND: ReasonFlags = ReasonFlags(0x0000_0002);
    pub const DATA_TRUNCATION: ReasonFlags = ReasonFlags(0x0000_0004);
    pub const FILE_CREATE: ReasonFlags = ReasonFlags(0x0000_0100);
    pub const FILE_DELETE: ReasonFlags = ReasonFlags(0x0000_0200);
    pub const SECURITY_CHANGE: ReasonFlags = ReasonFlags(0x0000_0800);
    pub const RENAME_OLD_NAME: ReasonFlags = ReasonFlags(0x0000_1000);
    pub const RENAME_NEW_NAME: ReasonFlags = ReasonFlags(0x0000_2000);
    pub const BASIC_INFO_CHANGE: ReasonFlags = ReasonFlags(0x0000_8000);
    pub const CLOSE: ReasonFlags = ReasonFlags(0x8000_0000);

    const NAMED: &[(ReasonFlags, &str)] = &[
        (Self::DATA_OVERWRITE, "DATA_OVERWRITE"),
        (Self::DATA_EXTEND, "DATA_EXTEND"),
        (Self::DATA_TRUNCATION, "DATA_TRUNCATION"),
        (Self::FILE_CREATE, "FILE_CREATE"),
        (Self::FILE_DELETE, "FILE_DELETE"),
        (Self::SECURITY_CHANGE, "SECURITY_CHANGE"),
        (Self::RENAME_OLD_NAME, "RENAME_OLD_NAME"),
        (Self::RENAME_NEW_NAME, "RENAME_NEW_NAME"),
        (Self::BASIC_INFO_CHANGE, "BASIC_INFO_CHANGE"),
        (Self::CLOSE, "CLOSE"),
    ];

    pub const fn empty() -> Self {
        ReasonFlags(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: ReasonFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: ReasonFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: ReasonFlags) -> Self {
        ReasonFlags(self.0 | other.0)
    }

    /// Names of every set bit, in declaration order. Unknown bits are
    /// ignored rather than invented.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl std::ops::BitOr for ReasonFlags {
    type Output = ReasonFlags;

    fn bitor(self, rhs: ReasonFlags) -> ReasonFlags {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for ReasonFlags {
    fn bitor_assign(&mut self, rhs: ReasonFlags) {
        self.0 |= rhs.0;
    }
}

impl std::fmt::Display for ReasonFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        write!(f, "{}", self.names().join("|"))
    }
}
