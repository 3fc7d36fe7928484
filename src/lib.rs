pub mod amount;
pub mod config;
pub mod csv;
pub mod dispatcher;
pub mod ledger;
pub mod model;
pub mod oracle;
pub mod reconciler;
pub mod service;

pub use amount::Amount;
pub use config::Settings;
pub use dispatcher::{DispatchStats, Dispatcher, DispatcherHandle};
pub use ledger::{Ledger, MemoryLedger, UserBalance};
pub use model::{Order, OrderNumber, OrderStatus, UserId};
pub use oracle::{AccrualOracle, HttpOracle, OracleOutcome};
pub use reconciler::{ReconcileAction, RetryPolicy, reconcile};
pub use service::LoyaltyService;
