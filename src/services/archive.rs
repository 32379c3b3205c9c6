//! Source snapshot extraction.

use std::io::Cursor;
use std::path::PathBuf;

use tempfile::TempDir;

/// Extract a zip archive into a fresh temp directory. Entries whose paths
/// would escape the directory are rejected outright.
pub fn extract_zip(data: &[u8]) -> anyhow::Result<TempDir> {
    let tmp = tempfile::Builder::new().prefix("opencel-src-").tempdir()?;
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let rel = entry
            .enclosed_name()
            .ok_or_else(|| anyhow::anyhow!("unsafe path in archive: {}", entry.name()))?;
        let dst = tmp.path().join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&dst)?;
            continue;
        }
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&dst)?;
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(tmp)
}

/// GitHub zipballs wrap the tree in a single `<owner>-<repo>-<sha>/`
/// directory; that directory is the application root.
pub fn find_app_root(extracted: &TempDir) -> anyhow::Result<PathBuf> {
    for entry in std::fs::read_dir(extracted.path())? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            return Ok(entry.path());
        }
    }
    anyhow::bail!("no root dir found in archive")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn make_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        let mut writer = zip::ZipWriter::new(&mut buf);
        for (name, body) in entries {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap();
        buf.into_inner()
    }

    #[test]
    fn extracts_nested_tree_and_finds_root() {
        let data = make_zip(&[
            ("acme-web-abc123/package.json", b"{}"),
            ("acme-web-abc123/src/index.js", b"console.log(1)"),
        ]);
        let tmp = extract_zip(&data).unwrap();
        let root = find_app_root(&tmp).unwrap();
        assert!(root.ends_with("acme-web-abc123"));
        assert!(root.join("package.json").exists());
        assert!(root.join("src/index.js").exists());
    }

    #[test]
    fn rejects_path_traversal() {
        let data = make_zip(&[("../evil.sh", b"#!/bin/sh")]);
        assert!(extract_zip(&data).is_err());
    }

    #[test]
    fn flat_archive_has_no_root() {
        let data = make_zip(&[("README.md", b"hi")]);
        let tmp = extract_zip(&data).unwrap();
        assert!(find_app_root(&tmp).is_err());
    }
}
