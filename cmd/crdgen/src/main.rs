use eventrigger_sensor::crd::Sensor;

use kube::CustomResourceExt;

fn main() {
    // safe unwrap: we know CRD is serializable
    print!("---\n{}\n", serde_yaml::to_string(&Sensor::crd()).unwrap());
}
