//! Open-mode tag shared by the client surface and the Validate RPC.

use num_derive::{FromPrimitive, ToPrimitive};

/// Mirrors the POSIX-ish open modes named in the external client surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum OpenMode {
    Read = 0,
    Write = 1,
    Create = 2,
    CreateNew = 3,
}

impl OpenMode {
    /// Whether this mode is permitted to create a file that doesn't exist yet.
    pub fn allows_create(self) -> bool {
        matches!(self, OpenMode::Create | OpenMode::CreateNew)
    }

    /// Whether this mode requires read access to the underlying file.
    pub fn needs_read(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::Create | OpenMode::CreateNew)
    }

    /// Whether this mode requires write access to the underlying file.
    pub fn needs_write(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::Create | OpenMode::CreateNew)
    }

    /// Whether this mode is `READ` exactly (directories are only readable
    /// through this mode).
    pub fn is_read_only(self) -> bool {
        matches!(self, OpenMode::Read)
    }
}
