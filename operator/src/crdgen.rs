//! Prints the CRDs for every benchmark kind as a YAML stream.
use perftest_operator::kinds;

fn main() {
    for crd in kinds::crds() {
        print!("---\n{}", serde_yaml::to_string(&crd).unwrap());
    }
}
