//! Build script: compiles the selection kernels in `kernels/` to PTX.
//!
//! Only runs with the `cuda` feature. Each `kernels/<name>.cu` becomes
//! `$OUT_DIR/kernels/<name>.ptx`, which the crate embeds with
//! `include_str!`. Set `NBEST_NVCC_ARCH` (e.g. `sm_80`) to target a specific
//! architecture; otherwise nvcc's default is used.

fn main() {
    #[cfg(feature = "cuda")]
    cuda::compile_kernels();
}

#[cfg(feature = "cuda")]
mod cuda {
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use std::{env, fs};

    pub fn compile_kernels() {
        let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
        let kernel_dir = manifest_dir.join("kernels");
        let ptx_dir = PathBuf::from(env::var("OUT_DIR").unwrap()).join("kernels");
        fs::create_dir_all(&ptx_dir).expect("Failed to create PTX output directory");

        println!("cargo:rerun-if-env-changed=NBEST_NVCC_ARCH");
        let arch = env::var("NBEST_NVCC_ARCH").ok();

        let mut compiled = 0;
        for entry in fs::read_dir(&kernel_dir).expect("Failed to read kernels/ directory") {
            let path = entry.expect("Failed to read kernels/ entry").path();
            if path.extension().is_some_and(|ext| ext == "cu") {
                compile_cu(&ptx_dir, &path, arch.as_deref());
                compiled += 1;
            }
        }
        assert!(compiled > 0, "No .cu files found in {}", kernel_dir.display());
    }

    fn compile_cu(ptx_dir: &Path, cu_path: &Path, arch: Option<&str>) {
        let stem = cu_path.file_stem().unwrap().to_str().unwrap();
        let ptx_path = ptx_dir.join(format!("{stem}.ptx"));
        println!("cargo:rerun-if-changed={}", cu_path.display());

        let mut nvcc = Command::new("nvcc");
        nvcc.arg("--ptx").arg("-O3");
        if let Some(arch) = arch {
            nvcc.arg(format!("-arch={arch}"));
        }
        let status = nvcc
            .arg("-o")
            .arg(&ptx_path)
            .arg(cu_path)
            .status()
            .expect("Failed to execute nvcc. Is the CUDA toolkit installed?");

        assert!(status.success(), "nvcc failed to compile {}", cu_path.display());
    }
}
