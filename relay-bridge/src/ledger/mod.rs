//! Everything that talks to the ledger: reading candidates from the index,
//! fetching data sections, and writing signed messages.

pub mod gateway;
pub mod index;
pub mod record;
pub mod writer;

pub use gateway::{GatewayClient, TransactionDataSource};
pub use index::{GraphQlIndex, IndexError, LedgerIndex};
pub use record::{BodySource, LedgerTransaction, RecordError, RequestRecord};
pub use writer::{LedgerWriter, MessengerClient, OutgoingMessage, SchedulerMonitor};
