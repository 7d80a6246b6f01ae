//! Prints the fleet CustomResourceDefinitions as a multi-document YAML stream.
//!
//! Usage: `cargo run -p fleet-types --bin crdgen > config/crd/fleet.yaml`

use fleet_types::{Cluster, ClusterNamespace, ClusterToken};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [Cluster::crd(), ClusterNamespace::crd(), ClusterToken::crd()];
    for crd in crds {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
