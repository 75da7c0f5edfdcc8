//! Config layering shared by both binaries: a CLI flag always wins over the
//! same field loaded from an optional TOML file; neither side has a
//! built-in default.

/// Picks `cli` if set, otherwise `file`.
pub fn layer<T>(cli: Option<T>, file: Option<T>) -> Option<T> {
    cli.or(file)
}
