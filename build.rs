// Build script to compile GLSL shaders to SPIR-V
//
// shaders/<stem>.<stage> becomes shaders/<stem>_<stage>.spv, the naming the
// pipeline stash uses to infer each module's stage.

use std::path::Path;
use std::process::Command;

const STAGES: [&str; 3] = ["vert", "frag", "comp"];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let Ok(entries) = std::fs::read_dir("shaders") else {
        println!("cargo:warning=No shaders/ directory, skipping shader compilation");
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stage) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !STAGES.contains(&stage) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let output = path.with_file_name(format!("{}_{}.spv", stem, stage));
        if !compile_shader(&path, &output) {
            // glslc is missing; the others would fail the same way
            break;
        }
    }
}

/// Returns false when glslc could not be run at all
fn compile_shader(input: &Path, output: &Path) -> bool {
    let result = Command::new("glslc").arg(input).arg("-o").arg(output).status();

    match result {
        Ok(status) if status.success() => {
            println!("cargo:rerun-if-changed={}", input.display());
            true
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input.display(), status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), shaders will not be compiled", e);
            println!(
                "cargo:warning=Install the Vulkan SDK or compile manually: glslc {} -o {}",
                input.display(),
                output.display()
            );
            false
        }
    }
}
