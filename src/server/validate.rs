//! Pure classification logic backing the `Validate` RPC (§7 of the design
//! doc). Kept free of I/O so it can be exhaustively unit tested against the
//! error table.

use crate::error::{CacheError, EEXIST, EISDIR, ENOENT, EPERM, SUCCESS};
use crate::wire::OpenMode;

/// Filesystem facts about the target path, gathered by the caller via
/// `std::fs::metadata` (or its absence).
#[derive(Debug, Clone, Copy)]
pub struct TargetFacts {
    pub exists: bool,
    pub is_directory: bool,
    pub is_regular_file: bool,
    pub can_read: bool,
    pub can_write: bool,
}

/// Classifies `facts` against `mode`, returning the wire `error_code`
/// (0 = success). Does not consider path-escape, which is checked earlier
/// by [`crate::wire::path::normalize`].
pub fn classify(facts: TargetFacts, mode: OpenMode) -> i32 {
    if !facts.exists {
        return if mode.allows_create() { SUCCESS } else { ENOENT };
    }

    if mode == OpenMode::CreateNew {
        return EEXIST;
    }

    if facts.is_directory {
        if !mode.is_read_only() {
            return EISDIR;
        }
        return if facts.can_read { SUCCESS } else { EPERM };
    }

    if !facts.is_regular_file {
        return EPERM;
    }

    if mode.needs_read() && !facts.can_read {
        return EPERM;
    }
    if mode.needs_write() && !facts.can_write {
        return EPERM;
    }

    SUCCESS
}

/// Converts a non-success classification code into a [`CacheError`] for
/// callers that want a typed error rather than the raw wire code.
pub fn classify_err(facts: TargetFacts, mode: OpenMode) -> Option<CacheError> {
    CacheError::from_code(classify(facts, mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(exists: bool, dir: bool, regular: bool, read: bool, write: bool) -> TargetFacts {
        TargetFacts { exists, is_directory: dir, is_regular_file: regular, can_read: read, can_write: write }
    }

    #[test]
    fn missing_file_read_is_enoent() {
        assert_eq!(classify(facts(false, false, false, true, true), OpenMode::Read), ENOENT);
    }

    #[test]
    fn missing_file_create_succeeds() {
        assert_eq!(classify(facts(false, false, false, true, true), OpenMode::Create), SUCCESS);
        assert_eq!(classify(facts(false, false, false, true, true), OpenMode::CreateNew), SUCCESS);
    }

    #[test]
    fn create_new_existing_is_eexist() {
        assert_eq!(classify(facts(true, false, true, true, true), OpenMode::CreateNew), EEXIST);
    }

    #[test]
    fn directory_write_is_eisdir() {
        assert_eq!(classify(facts(true, true, false, true, true), OpenMode::Write), EISDIR);
        assert_eq!(classify(facts(true, true, false, true, true), OpenMode::Create), EISDIR);
    }

    #[test]
    fn directory_read_without_permission_is_eperm() {
        assert_eq!(classify(facts(true, true, false, false, true), OpenMode::Read), EPERM);
    }

    #[test]
    fn directory_read_with_permission_succeeds() {
        assert_eq!(classify(facts(true, true, false, true, true), OpenMode::Read), SUCCESS);
    }

    #[test]
    fn non_regular_file_is_eperm() {
        assert_eq!(classify(facts(true, false, false, true, true), OpenMode::Read), EPERM);
    }

    #[test]
    fn missing_read_permission_is_eperm() {
        assert_eq!(classify(facts(true, false, true, false, true), OpenMode::Read), EPERM);
        assert_eq!(classify(facts(true, false, true, false, true), OpenMode::Create), EPERM);
    }

    #[test]
    fn missing_write_permission_is_eperm() {
        assert_eq!(classify(facts(true, false, true, true, false), OpenMode::Write), EPERM);
        assert_eq!(classify(facts(true, false, true, true, false), OpenMode::Create), EPERM);
    }

    #[test]
    fn existing_regular_file_happy_paths() {
        assert_eq!(classify(facts(true, false, true, true, true), OpenMode::Read), SUCCESS);
        assert_eq!(classify(facts(true, false, true, true, true), OpenMode::Write), SUCCESS);
        assert_eq!(classify(facts(true, false, true, true, true), OpenMode::Create), SUCCESS);
    }
}
