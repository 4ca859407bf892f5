//! CRD generation binary
//!
//! Prints the ReplicatedApp CustomResourceDefinition as YAML:
//! `cargo run -p crds --bin crdgen > config/crd/replicated-app.yaml`

use crds::ReplicatedApp;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = serde_yaml::to_string(&ReplicatedApp::crd())?;
    print!("{crd}");
    Ok(())
}
