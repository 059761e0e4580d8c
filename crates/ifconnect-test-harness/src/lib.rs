//! ifconnect-test-harness: deterministic peers for protocol testing.
//!
//! Provides [`MockSimulator`], a TCP server that speaks the Connect v2
//! wire protocol from the simulator side -- serving a programmable
//! manifest, answering reads from a live value table, and recording writes
//! and invokes -- plus [`announce_once`] for emitting mock discovery
//! broadcasts. Together they let client tests run without a real simulator
//! or network infrastructure.

pub mod announcer;
pub mod mock_simulator;

pub use announcer::announce_once;
pub use mock_simulator::{InvokeRecord, MockSimulator, WriteRecord};
