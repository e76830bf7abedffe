use anyhow::{ensure, Context, Result};
use flexi_logger::Logger;
use rayon::ThreadPoolBuilder;

use tileseg::{Config, ImageProcessor};

fn main() -> Result<()> {
    let config = Config::new();

    let _logger = Logger::try_with_str(&config.log_level)?
        .log_to_stderr()
        .start()
        .context("Failed to initialize logging")?;

    ensure!(
        config.input_dir.exists(),
        "Input directory does not exist: {}",
        config.input_dir.display()
    );

    if config.num_threads > 0 {
        ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build_global()?;
    }

    let processor = ImageProcessor::from_config(config)
        .context("Failed to set up the segmentation backend")?;
    let count = processor
        .process_directory()
        .context("Failed to segment images")?;

    log::info!("done, {count} label maps written");
    Ok(())
}
