//! Wire entities: every struct here is what actually lands in the bucket
//! as pretty-printed JSON. Doc comments stay dense for the handful of
//! fields operators actually set by hand and thin out for mechanical
//! bookkeeping fields.

pub mod deployment;
pub mod loadtest;
pub mod mock;

pub use deployment::{DeploymentMetadata, DeploymentStatus, Infrastructure};
pub use loadtest::{
    BundleFiles, LoadTestManifest, LoadTestPointer, LoadTestValidation, LoadTestVersion,
};
pub use mock::{Expectation, MockConfiguration};
