//! vsearch - find corpus images that contain the query image.
//!
//! # Usage
//!
//! ```bash
//! vsearch ./corpus query.png
//! vsearch ./corpus query.png --threshold 0.4 -n 5 --json
//! vsearch ./corpus query.png --config search.toml --annotate best.png
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use image::Rgb;
use imageproc::drawing::draw_line_segment_mut;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vsearch_cli::{decode_image, init_thread_pool, Image, ImageId, ImageMatch, QueryOptions, SearchConfig, SearchEngine};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "tif", "tiff", "webp", "pgm", "pnm"];

/// Visual similarity search over a directory of images.
///
/// Every image in the corpus directory is indexed in memory, then the query
/// image is matched against it.
#[derive(Parser)]
#[command(name = "vsearch", version, about)]
struct Cli {
    /// Directory of corpus images
    corpus_dir: PathBuf,

    /// Image to search for
    query: PathBuf,

    /// Drop results scoring below this (0.0 - 1.0)
    #[arg(short, long, default_value = "0.0")]
    threshold: f32,

    /// Maximum number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    max_results: usize,

    /// Search configuration (.json or .toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Draw the best match's bounding box onto its corpus image and save it here
    #[arg(long)]
    annotate: Option<PathBuf>,

    /// Worker threads (default: from the configuration)
    #[arg(long)]
    threads: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct JsonResult<'a> {
    path: &'a str,
    #[serde(flatten)]
    result: &'a ImageMatch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => SearchConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => SearchConfig::default(),
    };
    init_thread_pool(cli.threads.unwrap_or(config.detector.core.n_threads))?;
    info!("{}", config.summary());

    let paths = corpus_paths(&cli.corpus_dir)?;
    if paths.is_empty() {
        bail!("no images found in {}", cli.corpus_dir.display());
    }

    let t0 = Instant::now();
    let corpus: Vec<Image> = paths
        .par_iter()
        .enumerate()
        .filter_map(|(id, path)| match decode_image(path, id as ImageId) {
            Ok(img) => Some(img),
            Err(e) => {
                warn!("skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect();

    let engine = SearchEngine::new(config)?;
    let features = engine.index_corpus(&corpus)?;
    let snapshot = engine.build_index(features)?;
    info!(
        images = snapshot.image_count(),
        features = snapshot.feature_count(),
        elapsed = ?t0.elapsed(),
        "corpus indexed"
    );

    let query = decode_image(&cli.query, ImageId::MAX)?;
    let t1 = Instant::now();
    let results = engine.query(&query, QueryOptions::new(cli.threshold, cli.max_results))?;
    info!(results = results.len(), elapsed = ?t1.elapsed(), "query finished");

    let path_of = |id: ImageId| paths[id as usize].display().to_string();

    if cli.json {
        let names: Vec<String> = results.iter().map(|m| path_of(m.image_id)).collect();
        let output: Vec<JsonResult<'_>> = results
            .iter()
            .zip(&names)
            .map(|(result, path)| JsonResult { path, result })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if results.is_empty() {
        println!("No matches for {}", cli.query.display());
    } else {
        for (rank, m) in results.iter().enumerate() {
            println!(
                "{:>2}. {:.3}  {}  (inliers {}, feature {:.2}, geometric {:.2}, global {:.2})",
                rank + 1,
                m.score,
                path_of(m.image_id),
                m.inlier_count,
                m.feature_score,
                m.geometric_score,
                m.global_score,
            );
        }
    }

    if let (Some(out), Some(best)) = (&cli.annotate, results.first()) {
        annotate(&paths[best.image_id as usize], best, out)?;
        println!("Saved annotated match as {}", out.display());
    }

    Ok(())
}

/// Image files directly inside `dir`, in path order so ids are stable
fn corpus_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Outline the projected query corners on the matched image
fn annotate(matched: &Path, result: &ImageMatch, out: &Path) -> Result<()> {
    let mut canvas = image::open(matched)
        .with_context(|| format!("opening {}", matched.display()))?
        .to_rgb8();
    let corners = result.bounding_box;
    for i in 0..corners.len() {
        let (a, b) = (corners[i], corners[(i + 1) % corners.len()]);
        draw_line_segment_mut(
            &mut canvas,
            (a.x as f32, a.y as f32),
            (b.x as f32, b.y as f32),
            Rgb([255, 0, 0]),
        );
    }
    canvas
        .save(out)
        .with_context(|| format!("saving {}", out.display()))?;
    Ok(())
}
