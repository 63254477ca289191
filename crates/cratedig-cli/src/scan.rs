//! Album discovery.
//!
//! An album is a directory that directly contains audio files. Multi-disc
//! layouts ("CD1", "Disc 2", ...) are rolled up: the disc subdirectory's
//! tracks count towards the parent, which becomes the album.

use cratedig_core::config::LibraryConfig;
use cratedig_core::Fingerprint;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

fn disc_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:cd|disc|disk|dvd|vol(?:ume)?)[\s._-]*\d+$").unwrap()
    })
}

/// One discovered album directory with enough context to classify it without
/// reading tags: folder name, track volume, formats, and a sample of file
/// stems for the prompt.
#[derive(Debug, Clone, Serialize)]
pub struct AlbumInfo {
    pub path: PathBuf,
    pub folder_name: String,
    pub track_count: usize,
    pub disc_count: usize,
    pub formats: BTreeSet<String>,
    /// Up to eight track file stems, in directory order.
    pub sample_tracks: Vec<String>,
}

const SAMPLE_TRACKS: usize = 8;

pub fn is_disc_dir(name: &str) -> bool {
    disc_dir_re().is_match(name.trim())
}

fn is_audio_file(path: &Path, cfg: &LibraryConfig) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            cfg.audio_extensions.iter().any(|ext| *ext == e)
        })
        .unwrap_or(false)
}

fn is_ignored_dir(name: &str, cfg: &LibraryConfig) -> bool {
    let lower = name.to_ascii_lowercase();
    cfg.ignored_dirs.iter().any(|d| *d == lower) || name.starts_with('.')
}

/// Walk `root` and return the album directories beneath it, sorted by path.
pub fn scan_albums(root: &Path, cfg: &LibraryConfig) -> std::io::Result<Vec<AlbumInfo>> {
    struct Draft {
        track_count: usize,
        disc_dirs: BTreeSet<PathBuf>,
        formats: BTreeSet<String>,
        sample_tracks: Vec<String>,
    }

    let mut drafts: BTreeMap<PathBuf, Draft> = BTreeMap::new();

    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| {
        !(e.file_type().is_dir()
            && e.depth() > 0
            && e.file_name()
                .to_str()
                .map(|n| is_ignored_dir(n, cfg))
                .unwrap_or(false))
    }) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_audio_file(entry.path(), cfg) {
            continue;
        }

        let Some(parent) = entry.path().parent() else {
            continue;
        };
        // A track inside "CD2" belongs to the directory above it.
        let parent_name = parent.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let (album_dir, disc_dir) = if is_disc_dir(parent_name) && parent != root {
            match parent.parent() {
                Some(gp) => (gp.to_path_buf(), Some(parent.to_path_buf())),
                None => (parent.to_path_buf(), None),
            }
        } else {
            (parent.to_path_buf(), None)
        };

        let draft = drafts.entry(album_dir).or_insert_with(|| Draft {
            track_count: 0,
            disc_dirs: BTreeSet::new(),
            formats: BTreeSet::new(),
            sample_tracks: Vec::new(),
        });
        draft.track_count += 1;
        if let Some(d) = disc_dir {
            draft.disc_dirs.insert(d);
        }
        if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
            draft.formats.insert(ext.to_ascii_lowercase());
        }
        if draft.sample_tracks.len() < SAMPLE_TRACKS {
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                draft.sample_tracks.push(stem.to_string());
            }
        }
    }

    let albums = drafts
        .into_iter()
        .map(|(path, draft)| {
            let folder_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_string();
            AlbumInfo {
                path,
                folder_name,
                track_count: draft.track_count,
                disc_count: draft.disc_dirs.len().max(1),
                formats: draft.formats,
                sample_tracks: draft.sample_tracks,
            }
        })
        .collect();
    Ok(albums)
}

/// Albums as batch work items, fingerprinted off the directory itself.
pub fn to_work_items(
    albums: Vec<AlbumInfo>,
) -> Vec<cratedig_core::WorkItem<AlbumInfo>> {
    albums
        .into_iter()
        .filter_map(|album| match Fingerprint::of(&album.path) {
            Ok(fingerprint) => Some(cratedig_core::WorkItem {
                path: album.path.clone(),
                fingerprint,
                payload: album,
            }),
            Err(e) => {
                tracing::warn!(path = %album.path.display(), error = %e, "cannot stat album directory");
                None
            }
        })
        .collect()
}
