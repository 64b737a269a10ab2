//! Multi-file inspection and conversion.
//!
//! Each file gets its own adapter instance, picked by [`codec_for_path`] for
//! reading and [`codec_for_extension`] for writing, so files convert in
//! parallel on the rayon pool without sharing decoder state.
//!
//! ## Progress Events
//!
//! [`convert_all`] optionally takes an `mpsc::Sender<BatchEvent>`. One event
//! is sent per finished file, in completion order; the CLI renders them on a
//! printer thread while workers keep going.
//!
//! ## Output Naming
//!
//! ```text
//! inputs/a/dawn.tif   →  out/dawn.png
//! inputs/b/dawn.heic  →  out/dawn-2.png      # stem collision
//! ```

use crate::codecs::dispatch::{Codec, codec_for_extension, codec_for_path};
use crate::codecs::generic;
use crate::codecs::image::{AttributeMap, Image, keys};
use crate::codecs::loader::{CodecError, ImageLoader, LoadFlags};
use crate::codecs::third_party;
use crate::config::CodecConfig;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot walk {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("No convertible files under the given inputs")]
    NoInputs,
    #[error("No adapter writes '.{0}' files")]
    UnknownTarget(String),
}

/// Extensions the adapters read natively, besides whatever `image` reads.
const NATIVE_EXTENSIONS: &[&str] = &["png", "tif", "tiff", "heic", "heif", "hif"];

fn is_image_extension(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    NATIVE_EXTENSIONS.contains(&ext.as_str())
        || generic::supported_input_extensions().contains(&ext.as_str())
        || third_party::supported_output_extensions().contains(&ext.as_str())
}

/// Expand `inputs` into a list of files.
///
/// Files are taken as given. Directories are walked recursively and only
/// files with a known image extension are kept.
pub fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, BatchError> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in walkdir::WalkDir::new(input).sort_by_file_name() {
                let entry = entry.map_err(|source| BatchError::Walk {
                    path: input.clone(),
                    source,
                })?;
                if entry.file_type().is_file() && is_image_extension(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else {
            // Surface a missing file as an IO error up front.
            std::fs::metadata(input)?;
            files.push(input.clone());
        }
    }
    if files.is_empty() {
        return Err(BatchError::NoInputs);
    }
    Ok(files)
}

/// One source → target pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertJob {
    pub source: PathBuf,
    pub target: PathBuf,
}

/// Target paths under `out_dir` with extension `ext`, numbered on stem
/// collisions.
pub fn plan_jobs(sources: &[PathBuf], out_dir: &Path, ext: &str) -> Vec<ConvertJob> {
    let ext = ext.trim_start_matches('.');
    let mut taken = HashSet::new();
    sources
        .iter()
        .map(|source| {
            let stem = source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string());
            let mut name = format!("{stem}.{ext}");
            let mut n = 2;
            while !taken.insert(name.clone()) {
                name = format!("{stem}-{n}.{ext}");
                n += 1;
            }
            ConvertJob {
                source: source.clone(),
                target: out_dir.join(name),
            }
        })
        .collect()
}

/// Explicit save attributes from the command line. They beat config
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct SaveOverrides {
    pub quality: Option<i64>,
    pub compress: bool,
}

/// What a finished conversion reports.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Converted {
        index: usize,
        source: PathBuf,
        target: PathBuf,
        read_format: &'static str,
        written_format: &'static str,
        width: u32,
        height: u32,
        bits: u8,
    },
    Failed {
        index: usize,
        source: PathBuf,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub converted: usize,
    pub failed: usize,
}

fn reader_for(path: &Path, config: &CodecConfig) -> Result<Codec, CodecError> {
    Ok(codec_for_path(path)?.with_heif_max_bit_depth(config.heif.max_bit_depth))
}

/// Load `job.source` and write it to `job.target` with `writer`.
pub fn convert_one(
    job: &ConvertJob,
    writer: &Codec,
    config: &CodecConfig,
    overrides: &SaveOverrides,
) -> Result<(Codec, Image), CodecError> {
    let reader = reader_for(&job.source, config)?;
    let mut image = reader.load(&job.source, LoadFlags::default(), None)?;
    if let Some(quality) = overrides.quality {
        image.attributes.set(keys::QUALITY, quality);
    }
    if overrides.compress {
        image.attributes.set(keys::COMPRESS, true);
    }
    config.apply_defaults(&mut image, writer.kind());
    writer.save(&mut image, &job.target, None)?;
    Ok((reader, image))
}

/// Convert every job in parallel, sending one event per file.
///
/// Failures are reported as events and counted; they do not stop the batch.
pub fn convert_all(
    jobs: &[ConvertJob],
    target_ext: &str,
    config: &CodecConfig,
    overrides: &SaveOverrides,
    events: Option<Sender<BatchEvent>>,
) -> Result<BatchSummary, BatchError> {
    let ext = target_ext.trim_start_matches('.').to_ascii_lowercase();
    let writer = codec_for_extension(&ext)
        .ok_or_else(|| BatchError::UnknownTarget(ext.clone()))?
        .with_heif_max_bit_depth(config.heif.max_bit_depth);
    for dir in jobs.iter().filter_map(|j| j.target.parent()) {
        std::fs::create_dir_all(dir)?;
    }

    let outcomes: Vec<bool> = jobs
        .par_iter()
        .enumerate()
        .map_with(events, |events, (index, job)| {
            let event = match convert_one(job, &writer, config, overrides) {
                Ok((reader, image)) => BatchEvent::Converted {
                    index,
                    source: job.source.clone(),
                    target: job.target.clone(),
                    read_format: reader.format_name(),
                    written_format: writer.format_name(),
                    width: image.width,
                    height: image.height,
                    bits: image.bits_per_channel(),
                },
                Err(e) => BatchEvent::Failed {
                    index,
                    source: job.source.clone(),
                    error: e.to_string(),
                },
            };
            let ok = matches!(event, BatchEvent::Converted { .. });
            if let Some(tx) = events {
                tx.send(event).ok();
            }
            ok
        })
        .collect();

    let converted = outcomes.iter().filter(|ok| **ok).count();
    Ok(BatchSummary {
        converted,
        failed: outcomes.len() - converted,
    })
}

/// Serializable summary of one loaded file, for `info`.
#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    pub path: PathBuf,
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
    pub bits_per_channel: u8,
    pub has_alpha: bool,
    pub color_model: &'static str,
    pub icc_profile_bytes: Option<usize>,
    pub has_pixels: bool,
    pub text_keys: Vec<String>,
    pub attributes: AttributeMap,
}

impl ImageReport {
    fn new(path: &Path, format: &'static str, image: &Image) -> Self {
        Self {
            path: path.to_path_buf(),
            format,
            width: image.width,
            height: image.height,
            bits_per_channel: image.bits_per_channel(),
            has_alpha: image.has_alpha,
            color_model: image.original_color_model().name(),
            icc_profile_bytes: image.icc_profile.as_ref().map(|p| p.len()),
            has_pixels: image.has_pixels(),
            text_keys: image.embedded_text.keys().cloned().collect(),
            attributes: image.attributes.clone(),
        }
    }
}

/// Load one file with `flags` and summarise it.
pub fn inspect(path: &Path, flags: LoadFlags, config: &CodecConfig) -> Result<ImageReport, CodecError> {
    let codec = reader_for(path, config)?;
    let image = codec.load(path, flags, None)?;
    Ok(ImageReport::new(path, codec.format_name(), &image))
}

/// [`inspect`] every file in parallel, results in input order.
pub fn inspect_all(
    paths: &[PathBuf],
    flags: LoadFlags,
    config: &CodecConfig,
) -> Vec<(PathBuf, Result<ImageReport, CodecError>)> {
    paths
        .par_iter()
        .map(|p| (p.clone(), inspect(p, flags, config)))
        .collect()
}
