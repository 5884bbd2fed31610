// Online Schema Migration engine (C8 + C9), per §4.8/§4.9.

pub mod coordinator;
pub mod ops;
pub mod worker;

pub use coordinator::MigrationCoordinator;
pub use ops::{ColumnSpec, MigrationOp};
pub use worker::MigrationWorker;
