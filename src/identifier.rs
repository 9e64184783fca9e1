//! Resource identifiers and load kinds.
//!
//! A [`ResourceId`] addresses one resource across every manifest. Ordering is
//! ordinal and case-sensitive over `name`, then `variant`, then `extension`,
//! which is exactly the derived lexicographic order of the fields.

use crate::error::{Error, Result};

// =============================================================================
// Resource Identifier
// =============================================================================

/// Unique `(name, variant?, extension)` address of a resource.
///
/// `variant == None` means the resource applies to every variant.
///
/// The full name (`name.variant.extension` or `name.extension`) is computed on
/// demand; it is never memoized in shared state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    name: String,
    variant: Option<String>,
    extension: String,
}

impl ResourceId {
    /// Creates an identifier. An empty variant string is treated as absent.
    pub fn new(
        name: impl Into<String>,
        variant: Option<impl Into<String>>,
        extension: impl Into<String>,
    ) -> Self {
        let variant = variant.map(Into::into).filter(|v| !v.is_empty());
        Self {
            name: name.into(),
            variant,
            extension: extension.into(),
        }
    }

    /// Creates an identifier that applies to every variant.
    pub fn universal(name: impl Into<String>, extension: impl Into<String>) -> Self {
        Self::new(name, None::<String>, extension)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Renders `name.variant.extension`, or `name.extension` without a variant.
    pub fn full_name(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}.{}.{}", self.name, variant, self.extension),
            None => format!("{}.{}", self.name, self.extension),
        }
    }

    /// Content-addressed file name used on the update server.
    ///
    /// The hex-encoded hash is spliced in before the extension, so a changed
    /// payload never collides with a cached copy of the old one.
    pub fn remote_file_name(&self, hash: u32) -> String {
        let hash = hex::encode(hash.to_be_bytes());
        match &self.variant {
            Some(variant) => format!("{}.{}.{}.{}", self.name, variant, hash, self.extension),
            None => format!("{}.{}.{}", self.name, hash, self.extension),
        }
    }

    /// Returns true if this resource belongs to `current` under the variant rule.
    pub fn matches_variant(&self, current: Option<&str>) -> bool {
        match &self.variant {
            None => true,
            Some(variant) => Some(variant.as_str()) == current,
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}.{}.{}", self.name, variant, self.extension),
            None => write!(f, "{}.{}", self.name, self.extension),
        }
    }
}

// =============================================================================
// Load Kind
// =============================================================================

/// How a resource is consumed at runtime, which also selects its checksum mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoadKind {
    LoadFromFile = 0,
    LoadFromMemory = 1,
    LoadFromMemoryAndQuickDecrypt = 2,
    LoadFromMemoryAndDecrypt = 3,
    LoadFromBinary = 4,
    LoadFromBinaryAndQuickDecrypt = 5,
    LoadFromBinaryAndDecrypt = 6,
}

impl LoadKind {
    /// Returns the on-disk byte value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Quick-decrypt kinds mask only a short prefix.
    pub fn is_quick_encrypted(self) -> bool {
        matches!(
            self,
            Self::LoadFromMemoryAndQuickDecrypt | Self::LoadFromBinaryAndQuickDecrypt
        )
    }

    /// Full-decrypt kinds mask the whole payload.
    pub fn is_fully_encrypted(self) -> bool {
        matches!(
            self,
            Self::LoadFromMemoryAndDecrypt | Self::LoadFromBinaryAndDecrypt
        )
    }

    /// Binary kinds are raw byte assets rather than loadable bundles.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Self::LoadFromBinary | Self::LoadFromBinaryAndQuickDecrypt | Self::LoadFromBinaryAndDecrypt
        )
    }
}

impl TryFrom<u8> for LoadKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::LoadFromFile,
            1 => Self::LoadFromMemory,
            2 => Self::LoadFromMemoryAndQuickDecrypt,
            3 => Self::LoadFromMemoryAndDecrypt,
            4 => Self::LoadFromBinary,
            5 => Self::LoadFromBinaryAndQuickDecrypt,
            6 => Self::LoadFromBinaryAndDecrypt,
            _ => {
                return Err(Error::ManifestParse(format!("unknown load kind: {}", value)));
            }
        })
    }
}

impl std::fmt::Display for LoadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
