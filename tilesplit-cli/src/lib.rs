//! Pipeline wiring for the tilesplit command line.
//!
//! The run sequence is: element assignment over the input, optional polygon
//! clip, optional coverage optimisation, the member-way completion pass
//! when a complete mode is active, the batched write pass, and finally the
//! date-file rewrite.

#![forbid(unsafe_code)]

pub mod cli;
mod clip;
mod datefile;
mod input;
mod optimize;
mod output;
mod splitter;

use std::time::Instant;

use log::info;
use thiserror::Error;

pub use cli::{Cli, MapSizes};
pub use clip::{ClipRegion, PolygonError};
pub use datefile::DateFileError;
pub use input::InputError;
pub use output::{OutputError, WriteOptions};
pub use splitter::{PassError, Splitter, SplitterOptions};

/// Errors surfaced by a pipeline run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Pass(#[from] splitter::PassError),
    #[error(transparent)]
    Polygon(#[from] clip::PolygonError),
    #[error(transparent)]
    Output(#[from] output::OutputError),
    #[error(transparent)]
    DateFile(#[from] datefile::DateFileError),
}

/// Run the full pipeline for the parsed command line.
pub fn run(cli: &Cli) -> Result<(), RunError> {
    let started = Instant::now();

    let cutoff_ms = match &cli.date {
        Some(path) => datefile::read_cutoff(path)?,
        None => None,
    };

    let mut splitter = Splitter::new(SplitterOptions {
        zoom: cli.zoom,
        border: cli.border.clamp(0.0, 1.0),
        cutoff_ms,
        complete_relations: cli.complete,
        complete_areas: cli.complete_areas,
        check_metadata: cli.metadata,
        map_sizes: cli.size.unwrap_or(MapSizes::DEFAULT),
        max_ids: cli.max_ids,
    });

    let assignment = Instant::now();
    splitter.assign(&cli.input)?;
    if cli.timing {
        info!("element assignment took {:.1?}", assignment.elapsed());
    }

    if let Some(polygon) = &cli.polygon {
        info!("clipping tiles with polygon {polygon:?}");
        let region = clip::ClipRegion::from_file(polygon)?;
        splitter.clip(&region);
    }

    info!("{} modified tiles to store", splitter.modified_tiles());

    if let Some(node_limit) = cli.optimize {
        if node_limit > 0 {
            splitter.optimize(node_limit);
        }
    }

    splitter.complete_member_ways(&cli.input)?;

    let writing = Instant::now();
    splitter.write(
        &cli.input,
        &WriteOptions {
            output: &cli.output,
            write_metadata: cli.metadata,
            mbtiles: cli.mbtiles,
            max_files: cli.max_files.unwrap_or(usize::MAX),
        },
    )?;
    if cli.timing {
        info!("writing tiles took {:.1?}", writing.elapsed());
        info!("overall runtime {:.1?}", started.elapsed());
    }

    if cli.verbose {
        splitter.log_diagnostics();
    }

    if let Some(path) = &cli.date {
        datefile::write_latest(path, splitter.latest_ms())?;
    }
    Ok(())
}
