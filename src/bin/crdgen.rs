//! Generate CRD YAML from Rust types.
//!
//! Usage:
//!   cargo run --bin crdgen              # CRD to stdout
//!   cargo run --bin crdgen -- --out-dir ./crds   # one file per CRD

use integreatly_operator::crd::rhmi::Rhmi;
use kube::CustomResourceExt;
use std::path::PathBuf;

fn main() {
    let out_dir: Option<PathBuf> = std::env::args()
        .skip_while(|a| a != "--out-dir")
        .nth(1)
        .map(PathBuf::from);

    let crds = vec![(
        "integreatly.org_rhmis.yaml",
        serde_yaml::to_string(&Rhmi::crd()).unwrap(),
    )];

    match out_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir).expect("failed to create output directory");
            for (name, yaml) in &crds {
                let path = dir.join(name);
                std::fs::write(&path, format!("---\n{yaml}"))
                    .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
                eprintln!("wrote {}", path.display());
            }
        }
        None => {
            for (_name, yaml) in &crds {
                println!("---\n{yaml}");
            }
        }
    }
}
