use classplit::classify::ClassSet;
use classplit::las_io::PointCloudFile;
use classplit::split::{split_directory, split_file, ProgressEvent, SplitError};
use las::point::{Classification, Format};
use las::{Builder, Point, Write, Writer};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Writes a small point format 1 file with the given classification codes.
fn write_fixture(path: &Path, classification: &[u8], compressed: bool) {
    let mut builder = Builder::from((1, 2));
    builder.point_format = Format::new(1).unwrap();
    builder.point_format.is_compressed = compressed;
    let header = builder.into_header().unwrap();
    let mut writer = Writer::from_path(path, header).unwrap();
    for (i, &class_id) in classification.iter().enumerate() {
        let point = Point {
            x: i as f64,
            y: 2.0 * i as f64,
            z: 0.5,
            intensity: 100 + i as u16,
            gps_time: Some(1000.0 + i as f64),
            classification: Classification::new(class_id).unwrap(),
            ..Default::default()
        };
        writer.write(point).unwrap();
    }
    writer.close().unwrap();
}

fn pool() -> rayon::ThreadPool {
    rayon::ThreadPoolBuilder::new()
        .num_threads(2)
        .build()
        .unwrap()
}

fn output_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    files.sort();
    files
}

#[test]
fn split_las_one_file_per_class() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    write_fixture(&input_dir.path().join("sample.las"), &[2, 2, 5, 5, 5, 7], false);

    let keep: ClassSet = [2, 5].into_iter().collect();
    let skip = ClassSet::empty();
    let summary = split_directory(
        &pool(),
        input_dir.path(),
        output_dir.path(),
        &keep,
        &skip,
        |_| {},
    )
    .unwrap();
    assert_eq!(summary.nr_files, 1);
    assert_eq!(summary.nr_outputs, 3);

    let file_dir = output_dir.path().join("sample");
    assert_eq!(
        output_files(&file_dir),
        vec![
            file_dir.join("sample_2.las"),
            file_dir.join("sample_5.las"),
            file_dir.join("sample_7.las"),
        ]
    );

    // the rewrite depends on the keep set only, so all outputs carry the
    // same classification column
    for output in output_files(&file_dir) {
        let file = PointCloudFile::open(&output).unwrap();
        assert!(!file.is_compressed());
        assert_eq!(file.classification(), vec![2, 2, 5, 5, 5, 1]);
    }
}

#[test]
fn split_preserves_all_other_bytes() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let source = input_dir.path().join("sample.las");
    write_fixture(&source, &[2, 2, 5, 5, 5, 7], false);

    let keep: ClassSet = [2, 5].into_iter().collect();
    let skip = ClassSet::empty();
    split_directory(
        &pool(),
        input_dir.path(),
        output_dir.path(),
        &keep,
        &skip,
        |_| {},
    )
    .unwrap();

    let source_bytes = fs::read(&source).unwrap();
    let output_bytes = fs::read(output_dir.path().join("sample/sample_2.las")).unwrap();
    assert_eq!(source_bytes.len(), output_bytes.len());

    let header = las::raw::Header::read_from(source_bytes.as_slice()).unwrap();
    let point_data_start = header.offset_to_point_data as usize;
    let stride = header.point_data_record_length as usize;
    // point format 1: classification at byte 15 of each record
    assert_eq!(
        &source_bytes[..point_data_start],
        &output_bytes[..point_data_start]
    );
    for (i, (source_byte, output_byte)) in source_bytes[point_data_start..]
        .iter()
        .zip(&output_bytes[point_data_start..])
        .enumerate()
    {
        if i % stride == 15 {
            continue;
        }
        assert_eq!(source_byte, output_byte, "byte {i} of the point data differs");
    }
}

#[test]
fn split_laz_stays_compressed() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    write_fixture(&input_dir.path().join("sample.laz"), &[2, 2, 5, 5, 5, 7], true);

    let keep: ClassSet = [2, 5].into_iter().collect();
    let skip = ClassSet::empty();
    let summary = split_directory(
        &pool(),
        input_dir.path(),
        output_dir.path(),
        &keep,
        &skip,
        |_| {},
    )
    .unwrap();
    assert_eq!(summary.nr_outputs, 3);

    let output = output_dir.path().join("sample/sample_5.laz");
    let file = PointCloudFile::open(&output).unwrap();
    assert!(file.is_compressed());
    assert_eq!(file.point_format(), 1);
    assert_eq!(file.classification(), vec![2, 2, 5, 5, 5, 1]);
}

#[test]
fn skipped_classes_get_no_file() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    write_fixture(&input_dir.path().join("sample.las"), &[2, 2, 5, 5, 5, 7], false);

    let keep: ClassSet = [2, 5].into_iter().collect();
    let skip: ClassSet = [7].into_iter().collect();
    let summary = split_directory(
        &pool(),
        input_dir.path(),
        output_dir.path(),
        &keep,
        &skip,
        |_| {},
    )
    .unwrap();
    assert_eq!(summary.nr_outputs, 2);

    let file_dir = output_dir.path().join("sample");
    assert_eq!(
        output_files(&file_dir),
        vec![file_dir.join("sample_2.las"), file_dir.join("sample_5.las")]
    );
}

#[test]
fn all_classes_skipped_is_a_noop() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let source = input_dir.path().join("sample.las");
    write_fixture(&source, &[2, 2, 5, 5, 5, 7], false);

    let keep: ClassSet = [2].into_iter().collect();
    let skip: ClassSet = [2, 5, 7].into_iter().collect();
    let mut events = Vec::new();
    let nr_outputs = split_file(
        &pool(),
        &source,
        output_dir.path(),
        &keep,
        &skip,
        &mut |event| events.push(event),
    )
    .unwrap();
    assert_eq!(nr_outputs, 0);
    assert!(output_files(&output_dir.path().join("sample")).is_empty());
    assert_eq!(
        events,
        vec![
            ProgressEvent::FileStarted {
                path: source.clone(),
                nr_classes: 0
            },
            ProgressEvent::FileFinished {
                path: source.clone(),
                nr_outputs: 0
            },
        ]
    );
}

#[test]
fn progress_reaches_one_and_resets_per_file() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    write_fixture(&input_dir.path().join("a.las"), &[2, 2, 5, 5, 5, 7], false);
    write_fixture(&input_dir.path().join("b.las"), &[2, 5], false);

    let keep: ClassSet = [2, 5].into_iter().collect();
    let skip = ClassSet::empty();
    let mut events = Vec::new();
    split_directory(
        &pool(),
        input_dir.path(),
        output_dir.path(),
        &keep,
        &skip,
        |event| events.push(event),
    )
    .unwrap();

    // files are processed in name order
    let started: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::FileStarted { path, nr_classes } => Some((path.clone(), *nr_classes)),
            _ => None,
        })
        .collect();
    assert_eq!(
        started,
        vec![
            (input_dir.path().join("a.las"), 3),
            (input_dir.path().join("b.las"), 2),
        ]
    );

    // per file: monotonic fractions ending at 1.0
    let fractions_for = |file: &Path| -> Vec<f64> {
        events
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::ClassRewritten { path, fraction, .. } if path == file => {
                    Some(*fraction)
                }
                _ => None,
            })
            .collect()
    };
    assert_eq!(
        fractions_for(&input_dir.path().join("a.las")),
        vec![1.0 / 3.0, 2.0 / 3.0, 1.0]
    );
    assert_eq!(fractions_for(&input_dir.path().join("b.las")), vec![0.5, 1.0]);

    // all outputs of a file are written before the next file starts
    let b_started = events
        .iter()
        .position(|event| {
            matches!(event, ProgressEvent::FileStarted { path, .. } if path == &input_dir.path().join("b.las"))
        })
        .unwrap();
    let a_finished = events
        .iter()
        .position(|event| {
            matches!(event, ProgressEvent::FileFinished { path, .. } if path == &input_dir.path().join("a.las"))
        })
        .unwrap();
    assert!(a_finished < b_started);
}

#[test]
fn directory_without_point_clouds_is_an_error() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    fs::write(input_dir.path().join("notes.txt"), "not a point cloud").unwrap();

    let keep: ClassSet = [2].into_iter().collect();
    let skip = ClassSet::empty();
    let result = split_directory(
        &pool(),
        input_dir.path(),
        output_dir.path(),
        &keep,
        &skip,
        |_| {},
    );
    assert!(matches!(result, Err(SplitError::NoInputFiles { .. })));
    assert!(output_files(output_dir.path()).is_empty());
}

#[test]
fn keep_superset_copies_the_file_unchanged() {
    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let source = input_dir.path().join("sample.las");
    write_fixture(&source, &[2, 2, 5, 5, 5, 7], false);

    let keep: ClassSet = [2, 5, 7].into_iter().collect();
    let skip = ClassSet::empty();
    split_directory(
        &pool(),
        input_dir.path(),
        output_dir.path(),
        &keep,
        &skip,
        |_| {},
    )
    .unwrap();

    let output = fs::read(output_dir.path().join("sample/sample_2.las")).unwrap();
    assert_eq!(fs::read(&source).unwrap(), output);
}
