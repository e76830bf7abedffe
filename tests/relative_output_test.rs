//! Runs as its own test binary because it changes the working directory.

use std::env;
use std::fs;

use clap::Parser;
use image::{GrayImage, Luma};
use tempfile::TempDir;

use tileseg::{Config, ImageProcessor};

#[test]
fn test_overlay_with_relative_directories() {
    let temp_dir = TempDir::new().unwrap();
    env::set_current_dir(temp_dir.path()).unwrap();
    fs::create_dir_all("in/sub").unwrap();

    let mut img = GrayImage::from_pixel(16, 16, Luma([255]));
    for y in 4..10 {
        for x in 4..10 {
            img.put_pixel(x, y, Luma([10]));
        }
    }
    img.save("in/a.png").unwrap();
    img.save("in/sub/b.png").unwrap();

    let config = Config::try_parse_from(["tileseg", "in", "out", "--overlay"]).unwrap();
    let processor = ImageProcessor::from_config(config).unwrap();
    assert_eq!(processor.process_directory().unwrap(), 2);

    let root = temp_dir.path();
    assert!(root.join("out/a.png").exists());
    assert!(root.join("out/a_overlay.png").exists());
    assert!(root.join("out/sub/b_overlay.png").exists());
    assert!(!root.join("out/out").exists());
}
