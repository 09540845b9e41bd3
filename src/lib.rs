//! Sales order to invoice workflow: pricing, approval, work order derivation,
//! invoicing and payments over a sled store.

pub mod access;
pub mod clock;
pub mod error;
pub mod invoice;
pub mod numbering;
pub mod order;
pub mod payment;
pub mod pricing;
pub mod service;
pub mod settings;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;
pub mod work_order;

pub use error::{ErrorKind, WorkflowError, kind_of};
pub use service::WorkflowService;
