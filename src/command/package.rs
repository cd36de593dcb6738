use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use oxc3_core::formats::oica::{Archive, CaSettings};
use oxc3_core::{OxcError, Result};

use crate::command::global_args::GlobalArgs;

pub fn run(args: GlobalArgs) -> Result<()> {
    let mut archive = Archive::new();

    walk(&args.input_dir, &args.input_dir, &mut archive)?;
    if let Some(include_dir) = &args.include_dir {
        walk(include_dir, include_dir, &mut archive)?;
    }

    log::info!(
        "packaging {} entries from {} into {}",
        archive.entries.len(),
        args.input_dir.display(),
        args.output_file.display()
    );

    let settings = CaSettings::default();
    let (bytes, _generated_key) = oxc3_core::formats::oica::write(&archive, &settings)?;

    fs::write(&args.output_file, bytes).map_err(OxcError::Io)?;

    log::info!("wrote {} bytes", fs::metadata(&args.output_file).map_err(OxcError::Io)?.len());
    Ok(())
}

/// Recursively adds every directory and file under `dir` to `archive`,
/// storing paths relative to `root` with forward-slash separators (§4.F).
fn walk(root: &Path, dir: &Path, archive: &mut Archive) -> Result<()> {
    let read_dir = fs::read_dir(dir).map_err(OxcError::Io)?;

    for entry in read_dir {
        let entry = entry.map_err(OxcError::Io)?;
        let path = entry.path();
        let relative = relative_slash_path(root, &path)?;

        if path.is_dir() {
            archive.add_directory(relative)?;
            walk(root, &path, archive)?;
        } else {
            let data = fs::read(&path).map_err(OxcError::Io)?;
            let timestamp = file_timestamp_ns(&path)?;
            archive.add_file(relative, data, timestamp)?;
        }
    }

    Ok(())
}

fn relative_slash_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        OxcError::InvalidParameter(format!("{} is not inside {}", path.display(), root.display()))
    })?;

    let mut out = String::new();
    for (i, component) in relative.components().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    Ok(out)
}

fn file_timestamp_ns(path: &Path) -> Result<u64> {
    let metadata = fs::metadata(path).map_err(OxcError::Io)?;
    let modified = metadata.modified().map_err(OxcError::Io)?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).unwrap_or_default();
    Ok(since_epoch.as_nanos() as u64)
}
