//! Domain model: money value objects, the obligation lifecycle, the payment
//! ledger records, and the storage/collaborator ports the application layer
//! is written against.

pub mod money;
pub mod obligation;
pub mod payment;
pub mod ports;
