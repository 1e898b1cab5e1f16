use controller::api::FilePermissions;
use kube::CustomResourceExt;

fn main() {
    print!("{}", serde_yaml::to_string(&FilePermissions::crd()).unwrap())
}
