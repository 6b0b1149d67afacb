use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DB_FILE: &str = "dojo.sqlite3";
const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/dojo.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";
pub const BUNDLE_FORMAT_V1: &str = "dojod-workspace-v1";
pub const LEGACY_SQLITE_FORMAT: &str = "legacy-sqlite3";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub db_sha256: String,
}

/// `manifest.json` of a v1 bundle. The checksum is mandatory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleManifest {
    format: String,
    #[serde(default)]
    version: u32,
    #[serde(default)]
    app_version: Option<String>,
    #[serde(default)]
    exported_at: Option<String>,
    db_sha256: String,
    #[serde(default)]
    db_bytes: Option<u64>,
}

impl BundleManifest {
    fn parse(text: &str) -> anyhow::Result<Self> {
        let raw: serde_json::Value =
            serde_json::from_str(text).context("manifest.json is invalid JSON")?;
        let format = raw.get("format").and_then(|v| v.as_str()).unwrap_or("");
        if format != BUNDLE_FORMAT_V1 {
            bail!("unsupported bundle format: {}", format);
        }
        let mut manifest: BundleManifest =
            serde_json::from_value(raw).context("manifest.json is missing dbSha256")?;
        manifest.db_sha256 = manifest.db_sha256.trim().to_ascii_lowercase();
        if manifest.db_sha256.len() != 64
            || !manifest.db_sha256.bytes().all(|b| b.is_ascii_hexdigit())
        {
            bail!("manifest dbSha256 is not a sha256 hex digest");
        }
        Ok(manifest)
    }
}

/// Writer that hashes and counts everything passing through it.
struct Hashing<W> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> Hashing<W> {
    fn new(inner: W) -> Self {
        Hashing {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (W, String, u64) {
        (self.inner, hex(&self.hasher.finalize()), self.bytes)
    }
}

impl<W: Write> Write for Hashing<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn digest_file(path: &Path) -> anyhow::Result<(String, u64)> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut sink = Hashing::new(std::io::sink());
    std::io::copy(&mut f, &mut sink).context("failed to read for checksum")?;
    let (_, sha, bytes) = sink.finish();
    Ok((sha, bytes))
}

enum InputKind {
    Bundle,
    Sqlite,
}

fn detect_input(path: &Path) -> anyhow::Result<InputKind> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut head = [0u8; 16];
    let mut filled = 0;
    while filled < head.len() {
        let n = f.read(&mut head[filled..]).context("failed to read file signature")?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled >= ZIP_MAGIC.len() && head[..ZIP_MAGIC.len()] == ZIP_MAGIC {
        Ok(InputKind::Bundle)
    } else if filled == SQLITE_MAGIC.len() && &head == SQLITE_MAGIC {
        Ok(InputKind::Sqlite)
    } else {
        Err(anyhow!(
            "{} is neither a workspace bundle nor a sqlite database",
            path.to_string_lossy()
        ))
    }
}

/// Zips the workspace database with a checksummed manifest.
pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        bail!("workspace database not found: {}", db_path.to_string_lossy());
    }
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let (db_sha256, db_bytes) = digest_file(&db_path)?;
    let manifest = BundleManifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        version: 1,
        app_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        exported_at: Some(chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()),
        db_sha256: db_sha256.clone(),
        db_bytes: Some(db_bytes),
    };

    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create output file {}", out_path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    serde_json::to_writer_pretty(&mut zip, &manifest).context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    zip.start_file(META_WORKSPACE_ENTRY, opts)
        .context("failed to start workspace metadata entry")?;
    serde_json::to_writer_pretty(
        &mut zip,
        &serde_json::json!({ "sourceWorkspace": workspace_path.to_string_lossy() }),
    )
    .context("failed to write workspace metadata entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 3,
        db_sha256,
    })
}

/// Restores a bundle (or a bare sqlite backup) into `workspace_path`.
/// The live database is replaced only after the extracted copy verifies.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    let kind = detect_input(in_path)?;
    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("failed to create workspace {}", workspace_path.to_string_lossy()))?;
    let dst = workspace_path.join(DB_FILE);
    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }

    let (format, db_sha256) = match kind {
        InputKind::Sqlite => {
            std::fs::copy(in_path, &tmp_dst).with_context(|| {
                format!(
                    "failed to copy legacy sqlite backup {}",
                    in_path.to_string_lossy()
                )
            })?;
            let (sha, _) = digest_file(&tmp_dst)?;
            (LEGACY_SQLITE_FORMAT, sha)
        }
        InputKind::Bundle => match extract_verified(in_path, &tmp_dst) {
            Ok(sha) => (BUNDLE_FORMAT_V1, sha),
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_dst);
                return Err(e);
            }
        },
    };

    if dst.exists() {
        std::fs::remove_file(&dst)
            .with_context(|| format!("failed to remove existing database {}", dst.to_string_lossy()))?;
    }
    std::fs::rename(&tmp_dst, &dst)
        .with_context(|| format!("failed to move restored database to {}", dst.to_string_lossy()))?;

    Ok(ImportSummary {
        bundle_format_detected: format.to_string(),
        db_sha256,
    })
}

fn extract_verified(in_path: &Path, tmp_dst: &Path) -> anyhow::Result<String> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest = BundleManifest::parse(&manifest_text)?;

    let out = File::create(tmp_dst)
        .with_context(|| format!("failed to create temp database {}", tmp_dst.to_string_lossy()))?;
    let mut sink = Hashing::new(out);
    {
        let mut entry = archive
            .by_name(DB_ENTRY)
            .context("bundle missing db/dojo.sqlite3")?;
        std::io::copy(&mut entry, &mut sink).context("failed to extract database entry")?;
    }
    sink.flush().context("failed to flush extracted database")?;
    let (_, actual_sha, bytes) = sink.finish();

    if actual_sha != manifest.db_sha256 {
        bail!(
            "database checksum mismatch: manifest {} but bundle holds {}",
            manifest.db_sha256,
            actual_sha
        );
    }
    if let Some(expected) = manifest.db_bytes {
        if expected != bytes {
            bail!("database size mismatch: manifest {} bytes but bundle holds {}", expected, bytes);
        }
    }
    Ok(actual_sha)
}
