// build.rs

use std::path::Path;
use std::process::Command;

const SHADERS: &[(&str, &str)] = &[
    ("shaders/shader.vert", "shaders/vert.spv"),
    ("shaders/shader.frag", "shaders/frag.spv"),
    ("shaders/flat.frag", "shaders/flat_frag.spv"),
];

fn main() {
    for (source, output) in SHADERS {
        println!("cargo::rerun-if-changed={}", source);

        if !Path::new(source).exists() {
            continue;
        }

        match Command::new("glslc").args([*source, "-o", *output]).status() {
            Ok(status) if status.success() => {}
            Ok(status) => {
                println!("cargo::warning=glslc failed on {} ({})", source, status);
            }
            Err(err) => {
                println!(
                    "cargo::warning=glslc unavailable ({}); using existing {} if present",
                    err, output
                );
            }
        }
    }
}
