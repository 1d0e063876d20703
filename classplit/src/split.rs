//! The split orchestrator.
//!
//! Drives the per-file split: load a file, rewrite its classification column
//! once per target class on a worker pool, then write all output files. Files
//! of a directory are processed one after the other, so at most one file's
//! point data is held in memory at a time.

use crate::classify::{distinct_classes, split_classification, ClassId, ClassSet, ClassSplit};
use crate::las_io::{LasIoError, PointCloudFile};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::available_parallelism;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("Could not list {}: {source}", path.display())]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No .las or .laz files found in {}.", path.display())]
    NoInputFiles { path: PathBuf },

    #[error("{} has no usable file name.", path.display())]
    BadFileName { path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: LasIoError,
    },

    #[error("Failed to create output directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: LasIoError,
    },
}

/// Progress of the current source file.
///
/// Events are emitted on the calling thread, in order. The fraction restarts
/// at zero with every [ProgressEvent::FileStarted].
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A source file was loaded and its target classes were determined.
    FileStarted { path: PathBuf, nr_classes: usize },
    /// One target class finished rewriting. `fraction` grows monotonically
    /// and reaches 1.0 with the last class of the file.
    ClassRewritten {
        path: PathBuf,
        class_id: ClassId,
        fraction: f64,
    },
    /// All output files for the source file have been written.
    FileFinished { path: PathBuf, nr_outputs: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitSummary {
    /// Number of source files processed.
    pub nr_files: usize,
    /// Total number of output files written.
    pub nr_outputs: usize,
}

/// Default size for the rewrite worker pool. Half the cpu cores, leaving
/// headroom for file i/o.
pub fn default_nr_threads() -> usize {
    available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

/// Splits one LAS/LAZ file into one output file per distinct non-skipped
/// classification code, written to `output_dir/<stem>/<stem>_<id>.<ext>`.
///
/// Returns the number of output files written. A file whose classes are all
/// skipped produces no outputs, which is not an error.
pub fn split_file(
    pool: &rayon::ThreadPool,
    source: &Path,
    output_dir: &Path,
    keep: &ClassSet,
    skip: &ClassSet,
    progress: &mut impl FnMut(ProgressEvent),
) -> Result<usize, SplitError> {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or_else(|| SplitError::BadFileName {
            path: source.to_path_buf(),
        })?;
    let extension = source
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .ok_or_else(|| SplitError::BadFileName {
            path: source.to_path_buf(),
        })?;

    let file = PointCloudFile::open(source).map_err(|e| SplitError::Read {
        path: source.to_path_buf(),
        source: e,
    })?;
    let classification = file.classification();

    let file_output_dir = output_dir.join(&stem);
    fs::create_dir_all(&file_output_dir).map_err(|e| SplitError::CreateDir {
        path: file_output_dir.clone(),
        source: e,
    })?;

    let targets: Vec<ClassId> = distinct_classes(&classification)
        .into_iter()
        .filter(|&class_id| !skip.contains(class_id))
        .collect();
    debug!(
        "{}: {} points, target classes {:?}",
        source.display(),
        file.nr_points(),
        targets
    );
    progress(ProgressEvent::FileStarted {
        path: source.to_path_buf(),
        nr_classes: targets.len(),
    });
    if targets.is_empty() {
        progress(ProgressEvent::FileFinished {
            path: source.to_path_buf(),
            nr_outputs: 0,
        });
        return Ok(0);
    }

    // rewrite phase: one job per target class. All results are collected
    // before any output file is written.
    let keep = *keep;
    let skip = *skip;
    let mut results: Vec<ClassSplit> = Vec::with_capacity(targets.len());
    let (result_sender, result_receiver) = crossbeam_channel::unbounded();
    pool.in_place_scope(|scope| {
        for &target in &targets {
            let result_sender = result_sender.clone();
            let classification = classification.as_slice();
            scope.spawn(move |_| {
                let result = split_classification(classification, &keep, &skip, target);
                // receiver outlives the scope, send cannot fail
                let _ = result_sender.send((target, result));
            });
        }
        drop(result_sender);

        // collect in completion order
        let mut nr_collected = 0;
        for (target, result) in result_receiver.iter() {
            nr_collected += 1;
            progress(ProgressEvent::ClassRewritten {
                path: source.to_path_buf(),
                class_id: target,
                fraction: nr_collected as f64 / targets.len() as f64,
            });
            if let Some(split) = result {
                results.push(split);
            }
        }
    });
    results.sort_by_key(|split| split.class_id);

    // write phase
    for split in &results {
        let path = file_output_dir.join(format!("{stem}_{}.{extension}", split.class_id));
        info!("Writing {}", path.display());
        file.write_with_classification(&path, &split.classification)
            .map_err(|e| SplitError::Write {
                path: path.clone(),
                source: e,
            })?;
    }
    progress(ProgressEvent::FileFinished {
        path: source.to_path_buf(),
        nr_outputs: results.len(),
    });
    Ok(results.len())
}

/// Splits every `.las`/`.laz` file directly in `input_dir`.
///
/// Files are processed sequentially in name order; the first failure aborts
/// the run. A directory without any matching file is an error, so a mistyped
/// input path does not silently succeed.
pub fn split_directory(
    pool: &rayon::ThreadPool,
    input_dir: &Path,
    output_dir: &Path,
    keep: &ClassSet,
    skip: &ClassSet,
    mut progress: impl FnMut(ProgressEvent),
) -> Result<SplitSummary, SplitError> {
    let list_err = |e| SplitError::ListDir {
        path: input_dir.to_path_buf(),
        source: e,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(input_dir).map_err(list_err)? {
        let path = entry.map_err(list_err)?.path();
        let is_point_cloud = path
            .extension()
            .map(|ext| ext.eq("las") || ext.eq("laz"))
            .unwrap_or(false);
        if is_point_cloud && path.is_file() {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(SplitError::NoInputFiles {
            path: input_dir.to_path_buf(),
        });
    }
    files.sort();

    info!(
        "Splitting {} files from {}",
        files.len(),
        input_dir.display()
    );
    let mut summary = SplitSummary::default();
    for file in &files {
        info!("Processing {}", file.display());
        summary.nr_outputs += split_file(pool, file, output_dir, keep, skip, &mut progress)?;
        summary.nr_files += 1;
    }
    Ok(summary)
}
