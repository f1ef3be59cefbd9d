use std::path::PathBuf;

use maskprep::synth::{write_sample_dataset, SampleSpec};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let output_root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_dataset"));

    let manifest = write_sample_dataset(&output_root, &SampleSpec::default())?;

    println!(
        "Wrote {} images and {} masks to {} ({} expected pairs, {} unpaired images, {} orphan masks)",
        manifest.images,
        manifest.masks,
        output_root.display(),
        manifest.expected_pairs.len(),
        manifest.unpaired_images.len(),
        manifest.orphan_masks.len()
    );
    Ok(())
}
