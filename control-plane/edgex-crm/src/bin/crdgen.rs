use edgex_crm::crd::{edgex::EdgeX, edgex_v1alpha1};
use kube::core::{CustomResourceExt, crd::merge_crds};

fn main() {
    let crd = merge_crds(
        vec![edgex_v1alpha1::EdgeX::crd(), EdgeX::crd()],
        "v1alpha2",
    )
    .expect("merge EdgeX CRD versions");
    let yaml = serde_yaml::to_string(&crd).expect("serialize CRD to YAML");
    println!("{}", yaml);
}
