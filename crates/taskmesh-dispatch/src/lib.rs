//! `taskmesh-dispatch` — the task dispatch pipeline (§4.4): supervisor-side
//! route resolution and worker-side bounded-delay admission.
//!
//! The supervisor half ([`dispatcher::Dispatcher`]) turns a
//! `taskmesh_core::Effect` into `receive` RPCs against the resolved
//! worker(s). The worker half ([`timing_wheel::TimingWheel`] +
//! [`worker_pool::WorkerPool`]) admits those RPCs into a bucketed ring and
//! drains due items into a bounded executor pool.

pub mod dispatcher;
pub mod error;
pub mod router;
pub mod timing_wheel;
pub mod worker_pool;

pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use router::Router;
pub use timing_wheel::{OfferRejection, TimingWheel, TimingWheelConfig};
pub use worker_pool::{JobRegistration, JobRegistry, WorkerPool, WorkerPoolConfig};
