//! Rule-table control plane
//!
//! In-memory chain model, wire compiler, and the load/modify/commit
//! session that talks to a [`transport::TableTransport`].

pub mod chain;
pub mod compiler;
pub mod counters;
pub mod layout;
pub mod record;
pub mod session;
pub mod table;
pub mod transport;

pub use chain::{BuiltinHook, ChainTable};
pub use counters::CounterCache;
pub use record::{ChainId, Counter, MatchPayload, RuleRecord, Target, Verdict};
pub use session::TableSession;
pub use table::RuleTableModel;
pub use transport::{TableInfo, TableTransport, TransportError};
