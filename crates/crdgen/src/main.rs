use kube::CustomResourceExt as _;
use license_service::api::v1::IBMLicenseServiceScanner;
use license_service::api::v1alpha1::IBMLicenseServiceReporter;

fn main() {
    print!("{}", serde_yaml::to_string(&IBMLicenseServiceReporter::crd()).unwrap());
    println!("---");
    print!("{}", serde_yaml::to_string(&IBMLicenseServiceScanner::crd()).unwrap());
}
