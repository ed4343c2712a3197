pub mod odlm;
pub mod openshift;
pub mod v1;
pub mod v1alpha1;
