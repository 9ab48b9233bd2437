//! Output handling shared by every codec.

use super::{CodecError, SaveMode, SaveOptions};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Prefix of the asset URLs handed to front-ends.
const ASSET_URL_PREFIX: &str = "asset://localhost/";

/// Suffix of the scratch file used for atomic replacement.
const SCRATCH_SUFFIX: &str = ".picpool-tmp";

/// Size reduction in percent, rounded to two decimals.
///
/// Negative when the compressed file is larger. An empty original yields 0.
pub fn compress_rate(original_size: u64, compressed_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    let rate = (original_size as f64 - compressed_size as f64) / original_size as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

/// Convert a filesystem path to an `asset://localhost/` URL.
///
/// The path is percent-encoded like `encodeURIComponent`. An empty path maps
/// to an empty string.
pub fn asset_url(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let mut url = String::with_capacity(ASSET_URL_PREFIX.len() + path.len() * 3);
    url.push_str(ASSET_URL_PREFIX);
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => url.push(byte as char),
            _ => url.push_str(&format!("%{:02X}", byte)),
        }
    }
    url
}

/// Ensure the input exists and is a regular file; returns its size.
pub(crate) fn check_input(path: &Path) -> Result<u64, CodecError> {
    let display = path.to_string_lossy().to_string();
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CodecError::InputNotFound(display));
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        return Err(CodecError::NotAFile(display));
    }
    Ok(metadata.len())
}

/// Where the output for `input` goes.
///
/// An explicit path wins over the save mode.
pub(crate) fn resolve_output_path(
    input: &Path,
    explicit: Option<&str>,
    save: &SaveOptions,
) -> Result<PathBuf, CodecError> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }

    match save.mode {
        SaveMode::Overwrite => Ok(input.to_path_buf()),
        SaveMode::SaveAsNewFile => {
            let parent = input.parent().unwrap_or_else(|| Path::new(""));
            let stem = input.file_stem().unwrap_or_default().to_string_lossy();
            let name = match input.extension() {
                Some(ext) => format!("{}{}.{}", stem, save.new_file_suffix, ext.to_string_lossy()),
                None => format!("{}{}", stem, save.new_file_suffix),
            };
            Ok(parent.join(name))
        }
        SaveMode::SaveToNewFolder => {
            let folder = save.new_folder_path.as_deref().unwrap_or_default();
            if folder.is_empty() || !Path::new(folder).is_dir() {
                return Err(CodecError::OutputFolderMissing(folder.to_string()));
            }
            let name = input.file_name().unwrap_or_default();
            Ok(Path::new(folder).join(name))
        }
    }
}

/// Copy the original into `temp_dir` under a unique name.
pub(crate) fn backup_original(input: &Path, temp_dir: &Path) -> Result<PathBuf, CodecError> {
    fs::create_dir_all(temp_dir)?;
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let unique = uuid::Uuid::new_v4().simple().to_string();
    let name = match input.extension() {
        Some(ext) => format!("{}_{}.{}", stem, &unique[..12], ext.to_string_lossy()),
        None => format!("{}_{}", stem, &unique[..12]),
    };
    let target = temp_dir.join(name);
    fs::copy(input, &target)?;
    Ok(target)
}

/// Write `bytes` to `path` through a scratch file and a rename.
///
/// The rename keeps an overwritten input intact if the write fails halfway.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CodecError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut scratch = path.as_os_str().to_owned();
    scratch.push(SCRATCH_SUFFIX);
    let scratch = PathBuf::from(scratch);

    if let Err(e) = fs::write(&scratch, bytes) {
        let _ = fs::remove_file(&scratch);
        return Err(e.into());
    }
    fs::rename(&scratch, path)?;
    Ok(())
}

/// Allocated size of a file on disk.
pub(crate) fn disk_size(path: &Path) -> io::Result<u64> {
    Ok(fs::metadata(path)?.blocks() * 512)
}

/// SHA-256 of a file as lowercase hex.
pub(crate) fn file_sha256(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_compress_rate_rounding() {
        assert_eq!(compress_rate(1000, 750), 25.0);
        assert_eq!(compress_rate(3, 2), 33.33);
        assert_eq!(compress_rate(100, 120), -20.0);
        assert_eq!(compress_rate(0, 10), 0.0);
    }

    #[test]
    fn test_asset_url_encodes_like_uri_component() {
        assert_eq!(
            asset_url("/tmp/my photo.png"),
            "asset://localhost/%2Ftmp%2Fmy%20photo.png"
        );
        assert_eq!(asset_url("a(b)!~*'.c"), "asset://localhost/a(b)!~*'.c");
        assert_eq!(asset_url(""), "");
    }

    #[test]
    fn test_asset_url_encodes_utf8_bytes() {
        assert_eq!(asset_url("é"), "asset://localhost/%C3%A9");
    }

    #[test]
    fn test_check_input_missing_and_directory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.png");
        assert!(matches!(
            check_input(&missing),
            Err(CodecError::InputNotFound(_))
        ));
        assert!(matches!(check_input(dir.path()), Err(CodecError::NotAFile(_))));

        let file = dir.path().join("a.png");
        fs::write(&file, b"12345").unwrap();
        assert_eq!(check_input(&file).unwrap(), 5);
    }

    #[test]
    fn test_resolve_output_path_modes() {
        let input = Path::new("/photos/cat.png");

        let overwrite = SaveOptions::default();
        assert_eq!(
            resolve_output_path(input, None, &overwrite).unwrap(),
            PathBuf::from("/photos/cat.png")
        );

        let suffix = SaveOptions {
            mode: SaveMode::SaveAsNewFile,
            new_file_suffix: "_min".to_string(),
            new_folder_path: None,
        };
        assert_eq!(
            resolve_output_path(input, None, &suffix).unwrap(),
            PathBuf::from("/photos/cat_min.png")
        );

        assert_eq!(
            resolve_output_path(input, Some("/out/x.png"), &suffix).unwrap(),
            PathBuf::from("/out/x.png")
        );
    }

    #[test]
    fn test_resolve_output_path_folder_must_exist() {
        let dir = tempdir().unwrap();
        let input = Path::new("/photos/cat.png");

        let missing = SaveOptions {
            mode: SaveMode::SaveToNewFolder,
            new_folder_path: Some(dir.path().join("nope").to_string_lossy().to_string()),
            ..Default::default()
        };
        assert!(matches!(
            resolve_output_path(input, None, &missing),
            Err(CodecError::OutputFolderMissing(_))
        ));

        let present = SaveOptions {
            mode: SaveMode::SaveToNewFolder,
            new_folder_path: Some(dir.path().to_string_lossy().to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolve_output_path(input, None, &present).unwrap(),
            dir.path().join("cat.png")
        );
    }

    #[test]
    fn test_backup_original_keeps_extension() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("dog.jpg");
        fs::write(&input, b"jpeg bytes").unwrap();

        let backup = backup_original(&input, &dir.path().join("backups")).unwrap();
        assert!(backup.exists());
        assert_eq!(backup.extension().unwrap(), "jpg");
        assert!(
            backup
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("dog_")
        );
        assert_eq!(fs::read(&backup).unwrap(), b"jpeg bytes");
    }

    #[test]
    fn test_write_atomic_replaces_and_cleans_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.png");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join("nested").join("out.png.picpool-tmp").exists());
    }

    #[test]
    fn test_file_sha256() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt");
        fs::write(&path, b"hello world").unwrap();
        assert_eq!(
            file_sha256(&path).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
