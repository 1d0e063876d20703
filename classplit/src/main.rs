use anyhow::anyhow;
use clap::Parser;
use classplit::classify::ClassSet;
use classplit::split::{default_nr_threads, split_directory, ProgressEvent};
use cli::AppOptions;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use log::{debug, error, info};
use simple_logger::SimpleLogger;
use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    human_panic::setup_panic!();
    let args = AppOptions::parse();

    // route log lines through the progress bars, so bars and log output do
    // not clobber each other
    let logger = SimpleLogger::new().with_level(args.log_level.to_level_filter());
    let multi_progress = MultiProgress::new();
    LogWrapper::new(multi_progress.clone(), logger)
        .try_init()
        .expect("Failed to initialize logger.");

    match main_result(args, &multi_progress) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            debug!("{e:?}");
            ExitCode::FAILURE
        }
    }
}

fn main_result(args: AppOptions, multi_progress: &MultiProgress) -> Result<(), anyhow::Error> {
    if !args.input_dir.is_dir() {
        return Err(anyhow!(
            "Input path {} is not a directory.",
            args.input_dir.display()
        ));
    }
    std::fs::create_dir_all(&args.output_dir)?;

    let keep: ClassSet = args.keep.iter().copied().collect();
    let skip: ClassSet = args.skip.iter().copied().collect();
    let nr_threads = args.threads.unwrap_or_else(default_nr_threads);
    debug!("Using {nr_threads} worker threads");
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(nr_threads)
        .build()?;

    // one progress bar per source file, one tick per target class
    let mut bar: Option<ProgressBar> = None;
    let summary = split_directory(
        &pool,
        &args.input_dir,
        &args.output_dir,
        &keep,
        &skip,
        |event| match event {
            ProgressEvent::FileStarted { path, nr_classes } => {
                let pb = multi_progress.add(ProgressBar::new(nr_classes as u64));
                pb.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} [{wide_bar:.cyan/blue}] {pos}/{len} classes {msg}",
                    )
                    .unwrap()
                    .progress_chars("#>-"),
                );
                pb.set_message(path.display().to_string());
                bar = Some(pb);
            }
            ProgressEvent::ClassRewritten { .. } => {
                if let Some(pb) = &bar {
                    pb.inc(1);
                }
            }
            ProgressEvent::FileFinished { .. } => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
            }
        },
    )?;

    info!(
        "Done. Wrote {} output files for {} source files.",
        summary.nr_outputs, summary.nr_files
    );
    Ok(())
}
