//! Parser and in-memory representation of the dex manifest.
//!
//! One record per installable dex: where it must land on the device, where
//! its bytes come from locally, and the digest used to detect staleness.

use std::collections::HashMap;

/// Sentinel `zip_path` meaning "input_file is itself the dex".
pub const STANDALONE: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub input_file: String,
    pub zip_path: String,
    pub install_path: String,
    pub sha256: String,
}

impl ManifestEntry {
    pub fn is_standalone(&self) -> bool {
        self.zip_path == STANDALONE
    }
}

pub type Manifest = HashMap<String, ManifestEntry>;

/// Parse `input_file zip_path install_path sha256` lines into a manifest.
///
/// Splits on `\n` and skips a trailing empty line left by a final newline.
/// A duplicate `install_path` overwrites the earlier entry: last one in the
/// file wins, matching the device-side authority's own last-wins semantics.
pub fn parse(bytes: &[u8]) -> anyhow::Result<Manifest> {
    let text = std::str::from_utf8(bytes)?;
    let mut manifest = Manifest::new();
    for line in text.split('\n') {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        anyhow::ensure!(
            fields.len() == 4,
            "malformed manifest line, expected 4 fields, got {}: {line:?}",
            fields.len()
        );
        let entry = ManifestEntry {
            input_file: fields[0].to_string(),
            zip_path: fields[1].to_string(),
            install_path: fields[2].to_string(),
            sha256: fields[3].to_string(),
        };
        manifest.insert(entry.install_path.clone(), entry);
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_one_line() {
        let manifest = parse(b"a/b.jar - dex/classes.dex deadbeef\n").unwrap();
        assert_eq!(manifest.len(), 1);
        let entry = &manifest["dex/classes.dex"];
        assert_eq!(entry.input_file, "a/b.jar");
        assert_eq!(entry.zip_path, "-");
        assert_eq!(entry.sha256, "deadbeef");
        assert!(entry.is_standalone());
    }

    #[test]
    fn trailing_newline_does_not_add_empty_entry() {
        let manifest = parse(b"a.dex - dex/a.dex aaaa\n").unwrap();
        assert_eq!(manifest.len(), 1);
    }

    #[test]
    fn no_trailing_newline_still_parses_last_line() {
        let manifest = parse(b"a.dex - dex/a.dex aaaa").unwrap();
        assert_eq!(manifest.len(), 1);
    }

    #[test]
    fn duplicate_install_path_last_one_wins() {
        let manifest =
            parse(b"a.dex - dex/a.dex aaaa\nb.dex - dex/a.dex bbbb\n").unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest["dex/a.dex"].sha256, "bbbb");
        assert_eq!(manifest["dex/a.dex"].input_file, "b.dex");
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(parse(b"only three fields here\n").is_err());
    }

    #[test]
    fn empty_manifest_parses_empty() {
        let manifest = parse(b"").unwrap();
        assert!(manifest.is_empty());
    }
}
