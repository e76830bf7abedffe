use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use clap::Parser;
use image::{GrayImage, Luma};
use tempfile::TempDir;

use tileseg::{Config, ImageProcessor, SegmentOptions};

fn write_nucleus(path: &Path, x0: u32, y0: u32) {
    let mut img = GrayImage::from_pixel(24, 24, Luma([255]));
    for y in y0..y0 + 6 {
        for x in x0..x0 + 6 {
            img.put_pixel(x, y, Luma([20]));
        }
    }
    img.save(path).unwrap();
}

fn config(args: &[&OsStr]) -> Config {
    Config::try_parse_from(args).unwrap()
}

#[test]
fn test_process_directory_writes_label_maps() {
    let temp_dir = TempDir::new().unwrap();
    let input_dir = temp_dir.path().join("input");
    let output_dir = temp_dir.path().join("output");
    fs::create_dir_all(input_dir.join("sub")).unwrap();

    write_nucleus(&input_dir.join("a.png"), 4, 4);
    write_nucleus(&input_dir.join("sub/b.png"), 12, 10);
    fs::write(input_dir.join("notes.txt"), b"not an image").unwrap();

    let config = config(&[
        OsStr::new("tileseg"),
        input_dir.as_os_str(),
        output_dir.as_os_str(),
        OsStr::new("--backend"),
        OsStr::new("watershed"),
        OsStr::new("--overlay"),
    ]);
    let processor = ImageProcessor::from_config(config).unwrap();
    assert_eq!(processor.process_directory().unwrap(), 2);

    let a = image::open(output_dir.join("a.png")).unwrap().into_luma16();
    assert_eq!(a.dimensions(), (24, 24));
    assert_eq!(a.get_pixel(6, 6).0[0], 1);
    assert_eq!(a.get_pixel(20, 20).0[0], 0);

    let b = image::open(output_dir.join("sub/b.png")).unwrap().into_luma16();
    assert_eq!(b.get_pixel(14, 12).0[0], 1);

    assert!(output_dir.join("a_overlay.png").exists());
    assert!(output_dir.join("sub/b_overlay.png").exists());
    assert!(!output_dir.join("notes.png").exists());
}

#[test]
fn test_missing_input_directory() {
    let temp_dir = TempDir::new().unwrap();
    let input_dir = temp_dir.path().join("missing");

    let config = config(&[OsStr::new("tileseg"), input_dir.as_os_str()]);
    let processor = ImageProcessor::new(SegmentOptions::new("watershed"), config).unwrap();
    assert!(processor.process_directory().is_err());
}

#[test]
fn test_empty_directory() {
    let temp_dir = TempDir::new().unwrap();
    let output_dir = temp_dir.path().join("out");

    let config = config(&[
        OsStr::new("tileseg"),
        temp_dir.path().as_os_str(),
        output_dir.as_os_str(),
    ]);
    let processor = ImageProcessor::from_config(config).unwrap();
    assert_eq!(processor.process_directory().unwrap(), 0);
    assert!(output_dir.exists());
}

#[test]
fn test_blob_backend_requires_algorithm_name() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(&[
        OsStr::new("tileseg"),
        temp_dir.path().as_os_str(),
        OsStr::new("--backend"),
        OsStr::new("skimage_blob"),
    ]);
    assert!(ImageProcessor::from_config(config).is_err());
}
