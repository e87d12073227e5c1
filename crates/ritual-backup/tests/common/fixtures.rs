//! Test fixtures: world trees, archives and wired-up targets.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use ritual_backup::{ArchivePipeline, LocalTarget, PipelineSettings, RemoteTarget};
use ritual_core::{EventSink, FsStorage, FsTransport, NoopSink, Storage};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tar::{Builder, EntryType, Header};
use walkdir::WalkDir;

pub const BUCKET: &str = "ritual";
pub const EXTENSION: &str = "tar.gz";

/// Creates `<base>/<name>` with nested directories, an empty directory and
/// a file large enough to span many handoff chunks.
pub fn write_world(base: &Path, name: &str) -> PathBuf {
    let world = base.join(name);
    fs::create_dir_all(world.join("region")).unwrap();
    fs::create_dir_all(world.join("playerdata")).unwrap();
    fs::create_dir_all(world.join("datapacks/empty")).unwrap();

    fs::write(world.join("level.dat"), b"level data").unwrap();
    fs::write(world.join("playerdata/steve.dat"), b"steve").unwrap();

    let region: Vec<u8> = (0..300_000u32).map(|i| (i * 31 % 251) as u8).collect();
    fs::write(world.join("region/r.0.0.mca"), region).unwrap();
    world
}

/// Relative path to contents (`None` for directories) of every entry under `root`.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|entry| {
            let entry = entry.unwrap();
            let relative = entry.path().strip_prefix(root).unwrap().to_path_buf();
            let contents = entry
                .file_type()
                .is_file()
                .then(|| fs::read(entry.path()).unwrap());
            (relative, contents)
        })
        .collect()
}

/// Pipeline writing to `<root>/<bucket>/<key>`, with a small handoff buffer.
pub fn pipeline(root: &Path) -> ArchivePipeline {
    pipeline_with_events(root, Arc::new(NoopSink))
}

pub fn pipeline_with_events(root: &Path, events: Arc<dyn EventSink>) -> ArchivePipeline {
    ArchivePipeline::new(Arc::new(FsTransport::new(root)), events).with_settings(
        PipelineSettings {
            chunk_size: 4096,
            buffer_chunks: 2,
        },
    )
}

/// Storage addressing the same bucket the pipeline uploads to.
pub fn bucket_storage(root: &Path) -> Arc<FsStorage> {
    Arc::new(FsStorage::new(root.join(BUCKET)))
}

pub fn local_target(root: &Path, storage: Arc<dyn Storage>, max_backups: usize) -> LocalTarget {
    LocalTarget::new(pipeline(root), storage, BUCKET, "backups", EXTENSION, max_backups).unwrap()
}

pub fn remote_target(root: &Path, storage: Arc<dyn Storage>, max_backups: usize) -> RemoteTarget {
    RemoteTarget::new(pipeline(root), storage, BUCKET, "worlds", EXTENSION, max_backups).unwrap()
}

/// Gzipped tar holding one regular file per `(name, data)`, with the names
/// written verbatim into the header so that unsafe paths survive.
pub fn raw_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = Header::new_gnu();
        header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, *data).unwrap();
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&builder.into_inner().unwrap()).unwrap();
    encoder.finish().unwrap()
}

/// Places `bytes` where the filesystem transport serves `bucket/key` from.
pub fn put_object(root: &Path, key: &str, bytes: &[u8]) {
    let path = root.join(BUCKET).join(key);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}
