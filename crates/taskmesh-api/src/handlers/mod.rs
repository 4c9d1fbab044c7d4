pub mod instances;
pub mod jobs;
pub mod supervisor_rpc;
pub mod worker_rpc;
