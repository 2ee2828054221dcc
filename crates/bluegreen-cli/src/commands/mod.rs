pub mod manifests;
pub mod ops;
pub mod status;
