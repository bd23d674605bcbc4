//! Packaging of the rendered output into a single zip artifact.

use std::fs::File;
use std::io;
use std::path::Path;

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use prebake_core::error::{CoreError, CoreResult};

/// Zip every regular file under `src_dir` into `zip_path`.
///
/// Entry names are forward-slash paths relative to `src_dir`. Blocking;
/// the orchestrator calls this via `spawn_blocking`.
pub fn pack_dir(src_dir: &Path, zip_path: &Path) -> CoreResult<u64> {
    if let Some(parent) = zip_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(zip_path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0u64;
    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| CoreError::Internal(format!("walking output dir: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| CoreError::Internal(format!("relativizing {:?}: {e}", entry.path())))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        writer
            .start_file(name.as_str(), options)
            .map_err(|e| CoreError::Internal(format!("zip entry '{name}': {e}")))?;
        let mut input = File::open(entry.path())?;
        io::copy(&mut input, &mut writer)?;
        count += 1;
    }

    writer
        .finish()
        .map_err(|e| CoreError::Internal(format!("finalizing artifact: {e}")))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_nested_tree_with_relative_names() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("index.html"), "<html></html>").unwrap();
        std::fs::create_dir_all(src.path().join("about")).unwrap();
        std::fs::write(src.path().join("about/index.html"), "<html>about</html>").unwrap();

        let out = tempfile::tempdir().unwrap();
        let zip_path = out.path().join("artifact.zip");
        let count = pack_dir(src.path(), &zip_path).unwrap();
        assert_eq!(count, 2);

        let mut archive = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"index.html".to_string()));
        assert!(names.contains(&"about/index.html".to_string()));
    }

    #[test]
    fn empty_dir_produces_empty_zip() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let zip_path = out.path().join("artifact.zip");
        assert_eq!(pack_dir(src.path(), &zip_path).unwrap(), 0);
        assert!(zip_path.exists());
    }
}
