//! Line-oriented transport adapters
//!
//! Every instrument in the setup speaks an ASCII request/response protocol:
//! Telnet for the laser, raw-socket SCPI for the analyzer and both signal
//! generators, and a serial command set for the RF synthesizer. Drivers hold a
//! `Box<dyn LineAdapter>` so the same driver code runs over any transport.

pub mod mock;
pub mod serial_adapter;
pub mod tcp_adapter;

pub use mock::MockLineAdapter;
pub use serial_adapter::SerialLineAdapter;
pub use tcp_adapter::TcpLineAdapter;

use anyhow::Result;
use async_trait::async_trait;

/// Request/response transport with line framing.
#[async_trait]
pub trait LineAdapter: Send + Sync {
    /// Open the underlying session.
    async fn connect(&self) -> Result<()>;

    /// Close the underlying session. Closing an already closed adapter is a no-op.
    async fn disconnect(&self) -> Result<()>;

    /// Write one command followed by the line terminator.
    async fn write_line(&self, command: &str) -> Result<()>;

    /// Write one command and read a single response line (terminator stripped).
    async fn query(&self, command: &str) -> Result<String>;

    /// Whether a session is currently open.
    async fn is_connected(&self) -> bool;

    /// Transport description for logs.
    fn info(&self) -> String;
}
