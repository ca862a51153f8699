use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

// Included directly by integration tests via #[path]; stays free of
// crate-internal imports.
const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/shuled.sqlite3";
const DB_FILE_NAME: &str = "shuled.sqlite3";
const PHOTOS_DIR: &str = "passport_photos";
const TIMETABLES_DIR: &str = "timetables";
pub const BUNDLE_FORMAT_V1: &str = "shuled-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub entry_count: usize,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct Manifest {
    format: String,
    version: u32,
    app_version: String,
    exported_at: u64,
    blob_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    db_sha256: Option<String>,
}

fn file_sha256(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed reading {} for checksum", path.to_string_lossy()))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Workspace-relative blob files carried alongside the database. Zip
/// entry names keep the same relative paths so a restore lands each
/// file where the row that references it expects.
fn collect_blobs(
    workspace_path: &Path,
    rel_prefix: &str,
    out: &mut Vec<(PathBuf, String)>,
) -> anyhow::Result<()> {
    let dir = workspace_path.join(rel_prefix);
    if !dir.is_dir() {
        return Ok(());
    }
    let entries = std::fs::read_dir(&dir)
        .with_context(|| format!("failed to read directory {}", dir.to_string_lossy()))?;
    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read an entry of {}", dir.to_string_lossy()))?;
        let name = entry.file_name();
        let rel = format!("{}/{}", rel_prefix, name.to_string_lossy());
        let path = entry.path();
        if path.is_dir() {
            collect_blobs(workspace_path, &rel, out)?;
        } else {
            out.push((path, rel));
        }
    }
    Ok(())
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_src = workspace_path.join(DB_FILE_NAME);
    if !db_src.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_src.to_string_lossy()
        ));
    }

    let mut blobs: Vec<(PathBuf, String)> = Vec::new();
    collect_blobs(workspace_path, PHOTOS_DIR, &mut blobs)?;
    collect_blobs(workspace_path, TIMETABLES_DIR, &mut blobs)?;

    let manifest = Manifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        version: 1,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        blob_count: blobs.len(),
        db_sha256: Some(file_sha256(&db_src)?),
    };

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out = File::create(out_path)
        .with_context(|| format!("failed to create bundle at {}", out_path.to_string_lossy()))?;
    let mut bundle = ZipWriter::new(out);
    let deflated = FileOptions::default().compression_method(CompressionMethod::Deflated);

    bundle
        .start_file(MANIFEST_ENTRY, deflated)
        .context("failed to start manifest entry")?;
    let manifest_bytes =
        serde_json::to_vec_pretty(&manifest).context("failed to serialize manifest")?;
    bundle
        .write_all(&manifest_bytes)
        .context("failed to write manifest entry")?;

    append_file_entry(&mut bundle, DB_ENTRY, &db_src, deflated)?;
    for (path, rel) in &blobs {
        append_file_entry(&mut bundle, rel, path, deflated)?;
    }

    bundle.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 2 + blobs.len(),
    })
}

fn append_file_entry(
    bundle: &mut ZipWriter<File>,
    entry_name: &str,
    src: &Path,
    opts: FileOptions,
) -> anyhow::Result<()> {
    bundle
        .start_file(entry_name, opts)
        .with_context(|| format!("failed to start bundle entry {entry_name}"))?;
    let mut file = File::open(src)
        .with_context(|| format!("failed to open {}", src.to_string_lossy()))?;
    std::io::copy(&mut file, bundle)
        .with_context(|| format!("failed to write bundle entry {entry_name}"))?;
    Ok(())
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    if !looks_like_zip(in_path)? {
        return Err(anyhow!(
            "not a workspace bundle: {}",
            in_path.to_string_lossy()
        ));
    }

    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;

    let bundle = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(bundle).context("invalid zip archive")?;

    let manifest = read_manifest(&mut archive)?;
    if manifest.format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", manifest.format));
    }

    let staged = stage_database(&mut archive, workspace_path)?;
    if let Some(expected) = manifest.db_sha256.as_deref() {
        let actual = file_sha256(&staged)?;
        if actual != expected.to_ascii_lowercase() {
            let _ = std::fs::remove_file(&staged);
            return Err(anyhow!(
                "database checksum mismatch: expected {}, got {}",
                expected,
                actual
            ));
        }
    }

    let dst = workspace_path.join(DB_FILE_NAME);
    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&staged, &dst).with_context(|| {
        format!(
            "failed to move staged database to {}",
            dst.to_string_lossy()
        )
    })?;

    let restored = restore_blobs(&mut archive, workspace_path)?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 2 + restored,
    })
}

fn read_manifest(archive: &mut ZipArchive<File>) -> anyhow::Result<Manifest> {
    let mut text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut text)
        .context("failed to read manifest.json")?;
    serde_json::from_str(&text).context("manifest.json is invalid JSON")
}

/// Extracts the bundled database next to the live one under an
/// `.importing` suffix; the caller swaps it in only once the checksum
/// holds.
fn stage_database(
    archive: &mut ZipArchive<File>,
    workspace_path: &Path,
) -> anyhow::Result<PathBuf> {
    let staged = workspace_path.join(format!("{DB_FILE_NAME}.importing"));
    if staged.exists() {
        let _ = std::fs::remove_file(&staged);
    }
    let mut out = File::create(&staged).with_context(|| {
        format!(
            "failed to create temp database {}",
            staged.to_string_lossy()
        )
    })?;
    {
        let mut entry = archive
            .by_name(DB_ENTRY)
            .with_context(|| format!("bundle missing {DB_ENTRY}"))?;
        std::io::copy(&mut entry, &mut out).context("failed to extract database entry")?;
    }
    out.flush().context("failed to flush staged database")?;
    Ok(staged)
}

/// Blob dirs are rebuilt from the bundle so rows never point at
/// leftovers from the previous workspace contents.
fn restore_blobs(archive: &mut ZipArchive<File>, workspace_path: &Path) -> anyhow::Result<usize> {
    for dir in [PHOTOS_DIR, TIMETABLES_DIR] {
        let path = workspace_path.join(dir);
        if path.exists() {
            std::fs::remove_dir_all(&path)
                .with_context(|| format!("failed to clear {}", path.to_string_lossy()))?;
        }
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create {}", path.to_string_lossy()))?;
    }

    let mut restored = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("failed to read bundle entry {i}"))?;
        if entry.is_dir() || !is_blob_entry(entry.name()) {
            continue;
        }
        let name = entry.name().to_string();
        let Some(rel) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(anyhow!("bundle entry escapes the workspace: {}", name));
        };
        let target = workspace_path.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("failed to create {}", target.to_string_lossy()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract bundle entry {name}"))?;
        restored += 1;
    }
    Ok(restored)
}

fn is_blob_entry(name: &str) -> bool {
    name.strip_prefix(PHOTOS_DIR)
        .or_else(|| name.strip_prefix(TIMETABLES_DIR))
        .is_some_and(|rest| rest.starts_with('/'))
}

fn looks_like_zip(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    match f.read_exact(&mut sig) {
        Ok(()) => Ok(&sig == b"PK\x03\x04"),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e).context("failed to read file signature"),
    }
}
