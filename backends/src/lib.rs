pub mod backend;
pub mod s3;

pub use backend::RemoteStore;
pub use s3::AwsCliBackend;
