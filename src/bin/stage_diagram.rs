//! Generate Mermaid diagrams of the preflight gate and the stage topology
//! of every installation type.
//!
//! Usage:
//!   cargo run --bin stage_diagram                      # stdout
//!   cargo run --bin stage_diagram -- --out STAGES.md

use integreatly_operator::controller::preflight::PREFLIGHT_TRANSITIONS;
use integreatly_operator::controller::topology::{topology_for, Platform, StageSpec};
use integreatly_operator::crd::shared::InstallationType;
use std::path::PathBuf;

fn main() {
    let out: Option<PathBuf> = std::env::args()
        .skip_while(|a| a != "--out")
        .nth(1)
        .map(PathBuf::from);

    let md = generate();

    match out {
        Some(path) => {
            std::fs::write(&path, &md)
                .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
            eprintln!("wrote {}", path.display());
        }
        None => print!("{md}"),
    }
}

fn generate() -> String {
    let mut out = String::new();
    out.push_str("# Installation stages\n\n");
    out.push_str(
        "Auto-generated from `PREFLIGHT_TRANSITIONS` in `controller/preflight.rs` and \
         `topology_for` in `controller/topology.rs`.\n\n",
    );

    out.push_str("## Preflight gate\n\n");
    out.push_str("```mermaid\nstateDiagram-v2\n");
    out.push_str("    [*] --> InProgress\n");
    for t in PREFLIGHT_TRANSITIONS.iter() {
        out.push_str(&format!("    {} --> {} : [{}]\n", t.from, t.to, t.guard_name));
    }
    out.push_str("    Success --> [*]\n```\n");

    for (installation_type, platform) in [
        (InstallationType::ManagedApi, Platform::Aws),
        (InstallationType::ManagedApi, Platform::Gcp),
        (InstallationType::MultitenantManagedApi, Platform::Aws),
    ] {
        let topology = match topology_for(installation_type, &platform) {
            Ok(t) => t,
            Err(e) => panic!("no topology for {installation_type}: {e}"),
        };
        out.push_str(&format!("\n## {installation_type} ({platform:?})\n\n"));
        out.push_str("### Install\n\n");
        out.push_str(&flowchart(&topology.install));
        out.push_str("\n### Uninstall\n\n");
        out.push_str(&flowchart(&topology.uninstall));
    }

    out
}

fn node_id(stage: &str) -> String {
    stage
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn flowchart(stages: &[StageSpec]) -> String {
    let mut out = String::from("```mermaid\nflowchart LR\n");
    for stage in stages {
        let id = node_id(stage.name);
        out.push_str(&format!("    subgraph {id}[\"{}\"]\n", stage.name));
        if stage.products.is_empty() {
            out.push_str(&format!("        {id}_empty((\" \"))\n"));
        }
        for product in &stage.products {
            out.push_str(&format!("        {id}_{}[\"{product}\"]\n", node_id(product.as_str())));
        }
        out.push_str("    end\n");
    }
    for pair in stages.windows(2) {
        out.push_str(&format!(
            "    {} --> {}\n",
            node_id(pair[0].name),
            node_id(pair[1].name)
        ));
    }
    out.push_str("```\n");
    out
}
